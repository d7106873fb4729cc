use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("operation cancelled")]
    Cancelled,

    #[error("upstream rate limit: {msg} ({code})")]
    RateLimited { code: i64, msg: String },

    #[error("upstream error: {msg} ({code})")]
    Remote { code: i64, msg: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid bind address '{0}'")]
    Bind(String),

    #[error("all bind addresses are currently exhausted")]
    AddressesExhausted,

    #[error("source encode task failed or no higher quality available")]
    SourceFailed,

    #[error("source encode task timed out")]
    SourceTimeout,

    #[error("failed to fetch post {id} after {attempts} attempts")]
    RetriesExhausted { id: String, attempts: u32 },
}

impl Error {
    /// True for upstream rate-limit signals: code `-1`, code `429`, or a
    /// message carrying the free-tier limit notice.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Transient failures consume a retry; everything else surfaces.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Decode(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
