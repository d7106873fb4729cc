//! Feed traversal with a per-user TTL cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clipvault_api::{CancelToken, Post, Upstream, MAX_FEED_PAGE};
use tokio::time::sleep;

use crate::config::ArchiveConfig;
use crate::error::{Error, Result};

const RATE_LIMIT_PAUSE: Duration = Duration::from_secs(2);

/// Stop condition for pagination: keep posts strictly newer than a
/// fixed instant.
///
/// Feeds are monotonically non-increasing in create time, so the first
/// failing post ends the traversal and no further page is fetched. The
/// predicate is time-based by construction, which is what makes
/// re-applying it to cached feeds sound.
#[derive(Debug, Clone, Copy)]
pub struct TruncateAfter(pub DateTime<Utc>);

impl TruncateAfter {
    pub fn allows(&self, post: &Post) -> bool {
        post.create_time > self.0.timestamp()
    }
}

pub type FilterFn = Arc<dyn Fn(&Post) -> bool + Send + Sync>;
pub type FeedProgressFn = Arc<dyn Fn(usize) + Send + Sync>;

/// Keep only video posts.
pub fn videos_only() -> FilterFn {
    Arc::new(Post::is_video)
}

/// Keep only album posts.
pub fn albums_only() -> FilterFn {
    Arc::new(Post::is_album)
}

#[derive(Clone, Default)]
pub struct FeedOptions {
    /// Optional visibility filter; does not affect pagination depth.
    pub filter: Option<FilterFn>,
    /// Called with the running count of visible posts.
    pub on_progress: Option<FeedProgressFn>,
}

impl FeedOptions {
    fn visible(&self, post: &Post) -> bool {
        self.filter.as_ref().map_or(true, |f| f(post))
    }

    fn progress(&self, count: usize) {
        if let Some(cb) = &self.on_progress {
            cb(count);
        }
    }
}

/// Enumerate a user's posts, oldest first.
///
/// Pagination stops at the first post older than `truncate`. With the
/// cache enabled, a fresh-enough cache file short-circuits the
/// upstream entirely; otherwise the traversed (unfiltered,
/// newest-first) prefix is persisted for the next run. Callers rely on
/// the oldest-first order for resumability: an interrupted run leaves
/// only the newest tail for next time.
pub async fn enumerate<U: Upstream + ?Sized>(
    api: &U,
    user: &str,
    cfg: &ArchiveConfig,
    truncate: TruncateAfter,
    opts: &FeedOptions,
    cancel: &CancelToken,
) -> Result<Vec<Post>> {
    if cfg.feed_cache {
        if let Some(raw) = read_cache(&cache_path(&cfg.cache_root, user), cfg.feed_cache_ttl()) {
            tracing::info!(user, "using cached feed");
            let mut view = apply_view(raw, truncate, opts);
            opts.progress(view.len());
            view.reverse();
            return Ok(view);
        }
    }

    let raw = paginate(api, user, cfg, truncate, opts, cancel).await?;

    if cfg.feed_cache {
        if let Err(e) = write_cache(&cache_path(&cfg.cache_root, user), &raw) {
            tracing::warn!(user, error = %e, "failed to write feed cache");
        }
    }

    let mut view = apply_view(raw, truncate, opts);
    view.reverse();
    Ok(view)
}

/// Fetch pages until exhaustion or truncation; returns the traversed
/// prefix newest-first, unfiltered.
async fn paginate<U: Upstream + ?Sized>(
    api: &U,
    user: &str,
    cfg: &ArchiveConfig,
    truncate: TruncateAfter,
    opts: &FeedOptions,
    cancel: &CancelToken,
) -> Result<Vec<Post>> {
    let mut collected: Vec<Post> = Vec::new();
    let mut visible = 0usize;
    let mut cursor = String::from("0");

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let page = tokio::select! {
            page = api.user_feed_page(user, MAX_FEED_PAGE, &cursor) => page,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };
        let page = match page {
            Ok(page) => page,
            Err(e) if e.is_rate_limited() && cfg.retry_on_429 => {
                tracing::warn!(user, %cursor, "rate limited, retrying feed page");
                tokio::select! {
                    _ = sleep(RATE_LIMIT_PAUSE) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        for post in page.posts {
            if !truncate.allows(&post) {
                opts.progress(visible);
                return Ok(collected);
            }
            if opts.visible(&post) {
                visible += 1;
            }
            collected.push(post);
        }
        opts.progress(visible);

        if !page.has_more {
            return Ok(collected);
        }
        cursor = page.cursor;
    }
}

fn apply_view(raw: Vec<Post>, truncate: TruncateAfter, opts: &FeedOptions) -> Vec<Post> {
    let mut view = Vec::new();
    for post in raw {
        // Cached feeds are newest-first, so truncation still breaks early.
        if !truncate.allows(&post) {
            break;
        }
        if opts.visible(&post) {
            view.push(post);
        }
    }
    view
}

pub fn cache_path(cache_root: &Path, user: &str) -> PathBuf {
    cache_root.join("feeds").join(format!("{user}.json"))
}

/// The cached newest-first list, if fresh enough to use.
fn read_cache(path: &Path, ttl: Duration) -> Option<Vec<Post>> {
    let meta = std::fs::metadata(path).ok()?;
    let age = meta.modified().ok()?.elapsed().ok()?;
    if age > ttl {
        tracing::debug!(path = %path.display(), "feed cache expired");
        return None;
    }
    let data = std::fs::read(path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(posts) => Some(posts),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable feed cache");
            None
        }
    }
}

fn write_cache(path: &Path, posts: &[Post]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| Error::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let data = serde_json::to_vec(posts).map_err(|e| Error::Config(e.to_string()))?;
    clipvault_fs::atomic_write(path, &data)
        .map_err(|e| Error::Config(format!("feed cache write failed: {e}")))?;
    Ok(())
}
