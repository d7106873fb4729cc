use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Api(clipvault_api::Error),

    #[error(transparent)]
    Fetch(clipvault_fetch::Error),

    #[error(transparent)]
    Store(#[from] clipvault_store::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_disk_space(&self) -> bool {
        matches!(self, Error::Fetch(e) if e.is_disk_space())
    }

    /// Fatal errors halt the enclosing profile/post run; everything
    /// else is logged per asset and reconciliation moves on.
    pub fn is_fatal(&self) -> bool {
        self.is_cancelled() || self.is_disk_space()
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

impl From<clipvault_fetch::Error> for Error {
    fn from(e: clipvault_fetch::Error) -> Self {
        match e {
            clipvault_fetch::Error::Cancelled => Error::Cancelled,
            other => Error::Fetch(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
