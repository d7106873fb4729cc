//! Minimal HTTP abstraction for media downloads.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::{Error, Result};

/// A boxed stream of response body chunks.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Streaming HTTP client seam.
///
/// The download engine only ever opens a URL and consumes its body;
/// keeping that behind a trait keeps the engine testable without a
/// network. [`MediaClient`] is the production implementation.
pub trait HttpClient: Send + Sync {
    /// Open `url` and return the response body as a chunk stream.
    ///
    /// Implementations map non-success statuses to errors.
    fn stream(&self, url: &str) -> impl Future<Output = Result<BoxStream<'static, Result<Bytes>>>> + Send;
}

/// Production media client over reqwest.
///
/// Media downloads do not take API rate permits; they do share the
/// bind-address rotation when one is configured, which is why this
/// wraps the API transport rather than owning a client.
pub struct MediaClient {
    transport: std::sync::Arc<clipvault_api::Transport>,
}

impl MediaClient {
    pub fn new(transport: std::sync::Arc<clipvault_api::Transport>) -> Self {
        Self { transport }
    }
}

impl HttpClient for MediaClient {
    async fn stream(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let client = self.transport.client().map_err(Error::from)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Download(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Download(format!("HTTP {status} for {url}")));
        }
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Download(e.to_string())));
        Ok(Box::pin(stream))
    }
}
