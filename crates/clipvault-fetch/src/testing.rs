//! Offline doubles for the download engine's seams.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use clipvault_api::{Post, SourceEncode, Upstream, UserDetail, UserFeedPage};

use crate::error::{Error, Result};
use crate::http::{BoxStream, HttpClient};

pub enum Outcome {
    Ok(Vec<u8>),
    Truncate(Vec<u8>),
    Fail(String),
}

/// An [`HttpClient`] that replays a scripted sequence of outcomes and
/// records every requested URL.
pub struct ScriptedHttp {
    script: Mutex<VecDeque<Outcome>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedHttp {
    pub fn sequence(outcomes: Vec<Outcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Serve `body` for every request to `url`; other URLs fail.
    pub fn serving(url: &str, body: Vec<u8>) -> ServingHttp {
        ServingHttp {
            url: url.to_string(),
            body,
        }
    }

    /// Emit a prefix, then break the stream.
    pub fn truncating(url: &str, prefix: Vec<u8>) -> TruncatingHttp {
        TruncatingHttp {
            url: url.to_string(),
            prefix,
        }
    }

    /// A client that should never be reached.
    pub fn failing() -> FailingHttp {
        FailingHttp
    }

    pub fn ok(body: Vec<u8>) -> Outcome {
        Outcome::Ok(body)
    }

    pub fn fail(message: &str) -> Outcome {
        Outcome::Fail(message.to_string())
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.requests)
    }
}

fn chunk_stream(body: Vec<u8>) -> BoxStream<'static, Result<Bytes>> {
    Box::pin(futures_util::stream::once(async move {
        Ok(Bytes::from(body))
    }))
}

fn broken_stream(prefix: Vec<u8>) -> BoxStream<'static, Result<Bytes>> {
    Box::pin(futures_util::stream::iter(vec![
        Ok(Bytes::from(prefix)),
        Err(Error::Download("stream interrupted".into())),
    ]))
}

impl HttpClient for ScriptedHttp {
    async fn stream(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        self.requests.lock().unwrap().push(url.to_string());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Fail("script exhausted".into()));
        match outcome {
            Outcome::Ok(body) => Ok(chunk_stream(body)),
            Outcome::Truncate(prefix) => Ok(broken_stream(prefix)),
            Outcome::Fail(message) => Err(Error::Download(message)),
        }
    }
}

pub struct ServingHttp {
    url: String,
    body: Vec<u8>,
}

impl HttpClient for ServingHttp {
    async fn stream(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        if url == self.url {
            Ok(chunk_stream(self.body.clone()))
        } else {
            Err(Error::Download(format!("unexpected URL {url}")))
        }
    }
}

pub struct TruncatingHttp {
    url: String,
    prefix: Vec<u8>,
}

impl HttpClient for TruncatingHttp {
    async fn stream(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        if url == self.url {
            Ok(broken_stream(self.prefix.clone()))
        } else {
            Err(Error::Download(format!("unexpected URL {url}")))
        }
    }
}

pub struct FailingHttp;

impl HttpClient for FailingHttp {
    async fn stream(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        Err(Error::Download(format!("unexpected request to {url}")))
    }
}

/// A probe that always reports the same free space.
pub struct FixedProbe(pub u64);

impl clipvault_fs::DiskProbe for FixedProbe {
    fn available(&self, _path: &Path) -> clipvault_fs::Result<u64> {
        Ok(self.0)
    }
}

/// An [`Upstream`] whose `get_post` hands back a fixed post.
#[derive(Default)]
pub struct MockUpstream {
    post: Mutex<Option<Post>>,
}

impl MockUpstream {
    pub fn set_post(&self, post: Post) {
        *self.post.lock().unwrap() = Some(post);
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn get_post(&self, id: &str, _hd: bool) -> clipvault_api::Result<Post> {
        self.post
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| clipvault_api::Error::Remote {
                code: 4,
                msg: format!("no scripted post for {id}"),
            })
    }

    async fn user_feed_page(
        &self,
        _: &str,
        _: u32,
        _: &str,
    ) -> clipvault_api::Result<UserFeedPage> {
        unimplemented!("feed is not exercised by fetch tests")
    }

    async fn user_info(&self, _: &str) -> clipvault_api::Result<UserDetail> {
        unimplemented!("user info is not exercised by fetch tests")
    }

    async fn source_encode(&self, _: &str) -> clipvault_api::Result<SourceEncode> {
        unimplemented!("source encode is not exercised by fetch tests")
    }
}
