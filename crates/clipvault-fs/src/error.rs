use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to stat filesystem at {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("free-space probing is not supported on this platform")]
    UnsupportedPlatform,
}

pub type Result<T> = std::result::Result<T, Error>;
