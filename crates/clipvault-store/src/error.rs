use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection error: {0}")]
    Connection(String),

    #[error("asset kind {0} has no history columns")]
    UnsupportedKind(clipvault_api::AssetKind),

    #[error("failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

impl From<tokio_rusqlite::Error> for Error {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::Rusqlite(e) => Error::Sqlite(e),
            other => Error::Connection(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
