//! Typed operations over the upstream HTTP API.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::sleep;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::limiter::RateLimiter;
use crate::rotate::AddrRotator;
use crate::types::{Post, SourceEncode, UserDetail, UserFeedPage};

/// Maximum number of posts per feed page accepted by the upstream.
pub const MAX_FEED_PAGE: u32 = 34;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const SOURCE_POLL_BUDGET: u32 = 60;
const SOURCE_POLL_PAUSE: Duration = Duration::from_secs(1);
const SOURCE_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(2);

/// The upstream operation surface.
///
/// [`Api`] is the production implementation; tests substitute mocks so
/// the feed, fetch, and reconciliation layers run offline.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch a single post by ID or canonical URL. `hd` is a query hint.
    async fn get_post(&self, id_or_url: &str, hd: bool) -> Result<Post>;

    /// Fetch one page of a user's feed, newest first.
    async fn user_feed_page(&self, user: &str, count: u32, cursor: &str) -> Result<UserFeedPage>;

    /// Fetch profile details.
    async fn user_info(&self, user: &str) -> Result<UserDetail>;

    /// Obtain the highest-quality encode: submit a task, then poll to a
    /// terminal state.
    async fn source_encode(&self, post_id: &str) -> Result<SourceEncode>;
}

/// Outbound HTTP, optionally rotating across local bind addresses.
///
/// reqwest pins a local address per client, so rotation keeps one
/// client per address and lets the rotator pick per request.
pub enum Transport {
    Plain(reqwest::Client),
    Rotating {
        rotator: Arc<AddrRotator>,
        clients: HashMap<IpAddr, reqwest::Client>,
    },
}

impl Transport {
    /// A transport bound to no particular address.
    pub fn plain() -> Result<Self> {
        Ok(Transport::Plain(build_client(None)?))
    }

    /// A transport rotating across the rotator's address pool.
    pub fn rotating(rotator: Arc<AddrRotator>) -> Result<Self> {
        let mut clients = HashMap::new();
        for ip in rotator.addresses() {
            clients.insert(ip, build_client(Some(ip))?);
        }
        Ok(Transport::Rotating { rotator, clients })
    }

    /// The client to use for the next request.
    pub fn client(&self) -> Result<reqwest::Client> {
        match self {
            Transport::Plain(client) => Ok(client.clone()),
            Transport::Rotating { rotator, clients } => {
                let ip = rotator.next_available()?;
                Ok(clients[&ip].clone())
            }
        }
    }

    /// Flag the last-used bind address as quota-exhausted.
    pub fn note_rate_limited(&self) {
        if let Transport::Rotating { rotator, .. } = self {
            rotator.mark_current_exhausted();
        }
    }

    /// Issue one GET per bound address to verify the bindings dial out.
    /// Opt-in; leaves the default construction offline-testable.
    pub async fn probe(&self, url: &str) -> Result<()> {
        match self {
            Transport::Plain(client) => {
                client.get(url).send().await?;
            }
            Transport::Rotating { clients, .. } => {
                for (ip, client) in clients {
                    client
                        .get(url)
                        .send()
                        .await
                        .map_err(|e| Error::Transport(format!("bind {ip}: {e}")))?;
                }
            }
        }
        Ok(())
    }
}

fn build_client(local: Option<IpAddr>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(RESPONSE_TIMEOUT);
    if let Some(ip) = local {
        builder = builder.local_address(ip);
    }
    builder.build().map_err(Error::from)
}

/// Production upstream client.
///
/// Every operation, pollers included, takes one global rate permit per
/// HTTP call.
pub struct Api {
    base_url: String,
    limiter: Arc<RateLimiter>,
    transport: Arc<Transport>,
}

impl Api {
    pub fn new(
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
        transport: Arc<Transport>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter,
            transport,
        }
    }

    /// The outbound transport, shared with the media download client.
    pub fn transport(&self) -> Arc<Transport> {
        Arc::clone(&self.transport)
    }

    /// Fetch an endpoint and return the unparsed response body.
    ///
    /// Debugging aid: the envelope is not inspected, so malformed or
    /// error responses come back verbatim. Still rate limited.
    pub async fn raw(&self, method: &str, query: &[(&str, String)]) -> Result<String> {
        self.limiter.acquire().await?;
        let client = self.transport.client()?;
        let url = format!("{}/{}", self.base_url, method);
        let response = client.get(&url).query(query).send().await?;
        Ok(response.text().await?)
    }

    async fn get_data(&self, method: &str, query: &[(&str, String)]) -> Result<Value> {
        self.limiter.acquire().await?;
        let client = self.transport.client()?;
        let url = format!("{}/{}", self.base_url, method);
        let response = client.get(&url).query(query).send().await?;
        self.envelope(response, method).await
    }

    async fn post_form(&self, method: &str, form: &[(&str, String)]) -> Result<Value> {
        self.limiter.acquire().await?;
        let client = self.transport.client()?;
        let url = format!("{}/{}", self.base_url, method);
        let response = client.post(&url).form(form).send().await?;
        self.envelope(response, method).await
    }

    async fn envelope(&self, response: reqwest::Response, method: &str) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;
        if status.as_u16() == 429 {
            self.transport.note_rate_limited();
            return Err(Error::RateLimited {
                code: 429,
                msg: status.to_string(),
            });
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("{method}: HTTP {status}")));
        }
        match parse_envelope(&body, method) {
            Err(e) if e.is_rate_limited() => {
                self.transport.note_rate_limited();
                Err(e)
            }
            other => other,
        }
    }
}

#[async_trait]
impl Upstream for Api {
    async fn get_post(&self, id_or_url: &str, hd: bool) -> Result<Post> {
        let mut query = vec![("url", id_or_url.to_string())];
        if hd {
            query.push(("hd", "1".to_string()));
        }
        decode(self.get_data("", &query).await?)
    }

    async fn user_feed_page(&self, user: &str, count: u32, cursor: &str) -> Result<UserFeedPage> {
        let query = [
            ("unique_id", user.to_string()),
            ("count", count.min(MAX_FEED_PAGE).to_string()),
            ("cursor", cursor.to_string()),
        ];
        decode(self.get_data("user/posts", &query).await?)
    }

    async fn user_info(&self, user: &str) -> Result<UserDetail> {
        let query = [("unique_id", user.to_string())];
        decode(self.get_data("user/info", &query).await?)
    }

    async fn source_encode(&self, post_id: &str) -> Result<SourceEncode> {
        let form = [("web", "1".to_string()), ("url", post_id.to_string())];
        let data = self.post_form("video/task/submit", &form).await?;
        let task_id = data
            .get("task_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if task_id.is_empty() {
            return Err(Error::Decode("empty source task id".into()));
        }
        tracing::debug!(post_id, %task_id, "source encode task submitted");

        for _ in 0..SOURCE_POLL_BUDGET {
            let query = [("task_id", task_id.clone())];
            let data = match self.get_data("video/task/result", &query).await {
                Ok(data) => data,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if e.is_rate_limited() => {
                    sleep(SOURCE_RATE_LIMIT_PAUSE).await;
                    continue;
                }
                // Transient poll failures just burn an iteration.
                Err(_) => continue,
            };
            let status = data.get("status").and_then(Value::as_i64).unwrap_or(0);
            match status {
                2 => {
                    let detail: SourceEncode = data
                        .get("detail")
                        .filter(|v| !v.is_null())
                        .cloned()
                        .map(decode)
                        .transpose()?
                        .unwrap_or_default();
                    if detail.play_url.is_empty() {
                        return Err(Error::Decode("source encode result has no URL".into()));
                    }
                    return Ok(detail);
                }
                3 => return Err(Error::SourceFailed),
                _ => sleep(SOURCE_POLL_PAUSE).await,
            }
        }
        Err(Error::SourceTimeout)
    }
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| Error::Decode(e.to_string()))
}

/// Parse the `{code, msg, data}` envelope, classifying failures.
fn parse_envelope(body: &str, method: &str) -> Result<Value> {
    #[derive(serde::Deserialize)]
    struct Envelope {
        #[serde(default)]
        code: i64,
        #[serde(default)]
        msg: String,
        #[serde(default)]
        data: Option<Value>,
    }

    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| Error::Decode(format!("{method}: {e}")))?;
    if envelope.code != 0 {
        return Err(classify(envelope.code, envelope.msg));
    }
    envelope
        .data
        .ok_or_else(|| Error::Decode(format!("{method}: response carries no data")))
}

fn classify(code: i64, msg: String) -> Error {
    if code == -1 || code == 429 || msg.contains("Free Api Limit") {
        Error::RateLimited { code, msg }
    } else {
        Error::Remote { code, msg }
    }
}

/// Fetch a post, backing off on rate limits.
///
/// On a rate-limit signal, sleeps `2 << attempt` seconds and retries,
/// up to 5 attempts, provided `retry_on_429` is set; otherwise the
/// rate-limit error surfaces immediately. Shared by force-mode fetches,
/// album detail refreshes, fix-mode fetches, and the inter-retry post
/// refresh in the download harness.
pub async fn get_post_retrying<U: Upstream + ?Sized>(
    api: &U,
    post_id: &str,
    retry_on_429: bool,
    cancel: &CancelToken,
) -> Result<Post> {
    const MAX_ATTEMPTS: u32 = 5;
    for attempt in 0..MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match api.get_post(post_id, true).await {
            Ok(post) => return Ok(post),
            Err(e) if e.is_rate_limited() => {
                if !retry_on_429 {
                    return Err(e);
                }
                let wait = Duration::from_secs(2u64 << attempt);
                tracing::warn!(post_id, attempt, wait_secs = wait.as_secs(), "rate limited, retrying");
                tokio::select! {
                    _ = sleep(wait) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::RetriesExhausted {
        id: post_id.to_string(),
        attempts: MAX_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn envelope_surfaces_data() {
        let data = parse_envelope(r#"{"code":0,"msg":"success","data":{"id":"7"}}"#, "").unwrap();
        assert_eq!(data["id"], "7");
    }

    #[test]
    fn envelope_classifies_rate_limits() {
        for body in [
            r#"{"code":-1,"msg":"Free Api Limit: 1 request/second"}"#,
            r#"{"code":429,"msg":"too many requests"}"#,
            r#"{"code":5,"msg":"Free Api Limit exceeded"}"#,
        ] {
            let err = parse_envelope(body, "user/posts").unwrap_err();
            assert!(err.is_rate_limited(), "{body} should classify as rate limit");
        }
    }

    #[test]
    fn envelope_classifies_remote_errors() {
        let err = parse_envelope(r#"{"code":4,"msg":"url parsing failed"}"#, "").unwrap_err();
        assert!(matches!(err, Error::Remote { code: 4, .. }));
    }

    #[test]
    fn envelope_decode_failure_is_transient() {
        let err = parse_envelope("<html>gateway</html>", "user/posts").unwrap_err();
        assert!(err.is_transient());
    }

    struct FlakyUpstream {
        failures: AtomicU32,
    }

    #[async_trait]
    impl Upstream for FlakyUpstream {
        async fn get_post(&self, id: &str, _hd: bool) -> Result<Post> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                return Err(Error::RateLimited {
                    code: -1,
                    msg: "Free Api Limit".into(),
                });
            }
            Ok(Post {
                id: id.to_string(),
                ..Post::default()
            })
        }

        async fn user_feed_page(&self, _: &str, _: u32, _: &str) -> Result<UserFeedPage> {
            unimplemented!()
        }

        async fn user_info(&self, _: &str) -> Result<UserDetail> {
            unimplemented!()
        }

        async fn source_encode(&self, _: &str) -> Result<SourceEncode> {
            unimplemented!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_fetch_backs_off_and_recovers() {
        let api = FlakyUpstream {
            failures: AtomicU32::new(2),
        };
        let start = tokio::time::Instant::now();
        let post = get_post_retrying(&api, "42", true, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(post.id, "42");
        // 2s after the first failure, 4s after the second.
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn retrying_fetch_fails_fast_when_disabled() {
        let api = FlakyUpstream {
            failures: AtomicU32::new(1),
        };
        let err = get_post_retrying(&api, "42", false, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn retrying_fetch_gives_up_after_budget() {
        let api = FlakyUpstream {
            failures: AtomicU32::new(u32::MAX),
        };
        tokio::time::pause();
        let err = get_post_retrying(&api, "42", true, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 5, .. }));
    }
}
