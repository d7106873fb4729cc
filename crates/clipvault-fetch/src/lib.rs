//! Media download engine.
//!
//! Fetches one asset at a time: resolve the URL for the requested
//! kind, pre-check free disk space, stream the body to its final path
//! while hashing, validate videos through ffmpeg, and retry with an
//! in-place post refresh when links go stale. The [`HttpClient`] seam
//! keeps all of it testable without a network.

mod download;
mod error;
mod harness;
mod http;
mod kind;
mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use download::{file_sha256, Downloader, MIN_REQUIRED_DISK_SPACE};
pub use error::{Error, Result};
pub use harness::{fetch_asset, RetryOptions};
pub use http::{BoxStream, HttpClient, MediaClient};
pub use kind::{resolve_url, FetchKind};
pub use validate::FfmpegValidator;
