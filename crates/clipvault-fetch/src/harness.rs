//! The retry harness around a single asset download.

use std::path::Path;
use std::time::Duration;

use clipvault_api::{get_post_retrying, CancelToken, Post, Upstream};
use tokio::time::sleep;

use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::kind::{resolve_url, FetchKind};
use crate::validate::FfmpegValidator;

#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Attempts beyond the first.
    pub retries: u32,
    /// Pause between attempts.
    pub timeout_on_error: Duration,
    /// Whether the inter-retry post refresh may back off on 429s.
    pub retry_on_429: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout_on_error: Duration::from_secs(10),
            retry_on_429: false,
        }
    }
}

/// Fetch one asset to `dest`, returning its hex SHA-256.
///
/// Missing URLs, download failures, and validation failures each
/// consume a retry; between attempts the harness sleeps
/// `timeout_on_error`, and for HD/SD it refreshes the working post in
/// place first so the next attempt uses the freshest URL the upstream
/// will give. Disk-space exhaustion and cancellation abort immediately.
pub async fn fetch_asset<U, C>(
    api: &U,
    downloader: &Downloader<C>,
    validator: &FfmpegValidator,
    post: &mut Post,
    kind: &FetchKind,
    dest: &Path,
    opts: &RetryOptions,
    cancel: &CancelToken,
) -> Result<String>
where
    U: Upstream + ?Sized,
    C: HttpClient,
{
    let mut last_err: Option<Error> = None;

    for attempt in 0..=opts.retries {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if attempt > 0 {
            tracing::debug!(
                post_id = post.post_id(),
                kind = kind.name(),
                attempt,
                "retrying download"
            );
            tokio::select! {
                _ = sleep(opts.timeout_on_error) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
            if kind.refreshes_post() {
                let post_id = post.post_id().to_string();
                match get_post_retrying(api, &post_id, opts.retry_on_429, cancel).await {
                    Ok(fresh) => *post = fresh,
                    Err(clipvault_api::Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        last_err = Some(e.into());
                        continue;
                    }
                }
            }
        }

        let (url, size) = match resolve_url(api, post, kind).await {
            Ok(resolved) => resolved,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };

        let sha = match downloader.fetch_hashed(&url, dest, size, cancel).await {
            Ok(sha) => sha,
            Err(e) if e.is_disk_space() || e.is_cancelled() => return Err(e),
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };

        if post.is_video() && kind.is_video_quality() {
            match validator.validate(dest).await {
                Ok(true) => return Ok(sha),
                Ok(false) => {
                    let _ = tokio::fs::remove_file(dest).await;
                    last_err = Some(Error::Validation {
                        path: dest.to_path_buf(),
                        detail: "ffmpeg rejected the file".into(),
                    });
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(dest).await;
                    last_err = Some(e);
                }
            }
            continue;
        }
        return Ok(sha);
    }

    Err(Error::RetriesExhausted {
        id: post.post_id().to_string(),
        attempts: opts.retries + 1,
        last: Box::new(
            last_err.unwrap_or_else(|| Error::Download("all attempts failed".into())),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedProbe, MockUpstream, ScriptedHttp};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn video_post(id: &str, play: &str) -> Post {
        Post {
            id: id.to_string(),
            play: play.to_string(),
            size: 3,
            ..Post::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_consumes_a_retry_then_succeeds() {
        let http = ScriptedHttp::sequence(vec![
            ScriptedHttp::fail("connection reset"),
            ScriptedHttp::ok(b"abc".to_vec()),
        ]);
        let dl = Downloader::new(http, Arc::new(FixedProbe(u64::MAX)));
        let api = MockUpstream::default();
        let dir = tempdir().unwrap();
        let dest = dir.path().join("v.mp4");
        let mut post = video_post("1", "https://cdn.example/v.mp4");
        // MockUpstream returns the same post on refresh.
        api.set_post(post.clone());

        let sha = fetch_asset(
            &api,
            &dl,
            &FfmpegValidator::default(),
            &mut post,
            &FetchKind::Sd,
            &dest,
            &RetryOptions::default(),
            &CancelToken::never(),
        )
        .await
        .unwrap();
        assert_eq!(sha.len(), 64);
        assert!(dest.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn hd_retry_uses_refreshed_url() {
        let http = ScriptedHttp::sequence(vec![
            ScriptedHttp::fail("stale link"),
            ScriptedHttp::ok(b"new-bytes".to_vec()),
        ]);
        let requests = http.requests();
        let dl = Downloader::new(http, Arc::new(FixedProbe(u64::MAX)));
        let api = MockUpstream::default();
        let refreshed = Post {
            id: "1".into(),
            hdplay: "https://cdn.example/fresh.mp4".into(),
            hd_size: 9,
            ..Post::default()
        };
        api.set_post(refreshed);

        let dir = tempdir().unwrap();
        let mut post = Post {
            id: "1".into(),
            hdplay: "https://cdn.example/stale.mp4".into(),
            hd_size: 9,
            ..Post::default()
        };

        fetch_asset(
            &api,
            &dl,
            &FfmpegValidator::default(),
            &mut post,
            &FetchKind::Hd,
            &dir.path().join("v.mp4"),
            &RetryOptions::default(),
            &CancelToken::never(),
        )
        .await
        .unwrap();

        let urls = requests.lock().unwrap().clone();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/stale.mp4".to_string(),
                "https://cdn.example/fresh.mp4".to_string(),
            ]
        );
        assert_eq!(post.hdplay, "https://cdn.example/fresh.mp4");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_url_exhausts_retries() {
        let dl = Downloader::new(ScriptedHttp::sequence(vec![]), Arc::new(FixedProbe(u64::MAX)));
        let api = MockUpstream::default();
        let mut post = video_post("7", "");
        api.set_post(post.clone());
        let dir = tempdir().unwrap();

        let opts = RetryOptions {
            retries: 1,
            ..RetryOptions::default()
        };
        let err = fetch_asset(
            &api,
            &dl,
            &FfmpegValidator::default(),
            &mut post,
            &FetchKind::Sd,
            &dir.path().join("v.mp4"),
            &opts,
            &CancelToken::never(),
        )
        .await
        .unwrap_err();

        match err {
            Error::RetriesExhausted { attempts: 2, last, .. } => {
                assert!(matches!(*last, Error::MissingUrl { kind: "sd" }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn disk_space_is_not_retried() {
        let http = ScriptedHttp::sequence(vec![ScriptedHttp::ok(b"abc".to_vec())]);
        let requests = http.requests();
        let dl = Downloader::new(http, Arc::new(FixedProbe(0)));
        let api = MockUpstream::default();
        let mut post = video_post("1", "https://cdn.example/v.mp4");
        api.set_post(post.clone());
        let dir = tempdir().unwrap();

        let err = fetch_asset(
            &api,
            &dl,
            &FfmpegValidator::default(),
            &mut post,
            &FetchKind::Sd,
            &dir.path().join("v.mp4"),
            &RetryOptions::default(),
            &CancelToken::never(),
        )
        .await
        .unwrap_err();

        assert!(err.is_disk_space());
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn album_photo_skips_video_validation() {
        let http = ScriptedHttp::sequence(vec![ScriptedHttp::ok(b"jpeg".to_vec())]);
        let dl = Downloader::new(http, Arc::new(FixedProbe(u64::MAX)));
        let api = MockUpstream::default();
        let dir = tempdir().unwrap();
        let mut post = Post {
            id: "9".into(),
            images: vec!["https://cdn.example/p1.jpg".into()],
            ..Post::default()
        };

        // A validator pointing at a nonexistent binary would fail any
        // video validation; photos must never reach it.
        let validator = FfmpegValidator::new(Some("/no/such/ffmpeg-zz9".into()));
        fetch_asset(
            &api,
            &dl,
            &validator,
            &mut post,
            &FetchKind::Photo("https://cdn.example/p1.jpg".into()),
            &dir.path().join("p1.jpg"),
            &RetryOptions::default(),
            &CancelToken::never(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_work() {
        let dl = Downloader::new(ScriptedHttp::sequence(vec![]), Arc::new(FixedProbe(u64::MAX)));
        let api = MockUpstream::default();
        let (canceller, token) = clipvault_api::cancel_pair();
        canceller.cancel();
        let mut post = video_post("1", "https://cdn.example/v.mp4");
        let dir = tempdir().unwrap();

        let err = fetch_asset(
            &api,
            &dl,
            &FfmpegValidator::default(),
            &mut post,
            &FetchKind::Sd,
            &dir.path().join("v.mp4"),
            &RetryOptions::default(),
            &token,
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
