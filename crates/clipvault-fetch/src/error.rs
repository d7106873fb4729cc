use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("operation cancelled")]
    Cancelled,

    #[error("insufficient disk space in {dir}: {available} bytes available, {required} required")]
    DiskSpace {
        dir: PathBuf,
        available: u64,
        required: u64,
    },

    #[error("could not check disk space: {0}")]
    DiskProbe(#[from] clipvault_fs::Error),

    #[error("no URL available for {kind}")]
    MissingUrl { kind: &'static str },

    #[error("download failed: {0}")]
    Download(String),

    #[error("validation failed for {path}: {detail}")]
    Validation { path: PathBuf, detail: String },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(clipvault_api::Error),

    #[error("giving up on post {id} after {attempts} attempts: {last}")]
    RetriesExhausted {
        id: String,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
}

impl Error {
    /// Disk-space exhaustion is fatal for the current target run and is
    /// never retried.
    pub fn is_disk_space(&self) -> bool {
        matches!(self, Error::DiskSpace { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<clipvault_api::Error> for Error {
    fn from(e: clipvault_api::Error) -> Self {
        match e {
            clipvault_api::Error::Cancelled => Error::Cancelled,
            other => Error::Api(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
