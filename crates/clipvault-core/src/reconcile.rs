//! The per-post reconciliation engine.
//!
//! For each post, decide per wanted asset whether it is already
//! archived, can be adopted from a file an earlier run left on disk,
//! or must be fetched. Only disk-space exhaustion and cancellation
//! halt a run; every other failure is logged against its asset and
//! reconciliation moves on.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use clipvault_api::{get_post_retrying, AssetKind, CancelToken, Post, Upstream};
use clipvault_fetch::{
    fetch_asset, file_sha256, Downloader, FetchKind, FfmpegValidator, HttpClient,
};
use clipvault_store::HistoryStore;

use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::feed::{enumerate, FeedOptions, TruncateAfter};
use crate::paths;

pub type ProgressFn = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

pub fn noop_progress() -> ProgressFn {
    Arc::new(|_, _, _| {})
}

/// Race an upstream call against cancellation, so an in-flight request
/// returns promptly when the target is de-prioritized.
pub(crate) async fn guarded<T>(
    cancel: &CancelToken,
    fut: impl Future<Output = clipvault_api::Result<T>>,
) -> Result<T> {
    tokio::select! {
        result = fut => result.map_err(Error::from),
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}

fn video_fetch_kind(kind: AssetKind) -> Result<FetchKind> {
    match kind {
        AssetKind::Sd => Ok(FetchKind::Sd),
        AssetKind::Hd => Ok(FetchKind::Hd),
        AssetKind::Source => Ok(FetchKind::Source),
        other => Err(Error::Config(format!("{other} is not a video quality"))),
    }
}

/// The archival engine, generic over its upstream and HTTP seams so
/// the whole decision procedure runs offline in tests.
pub struct Archiver<U: Upstream, C: HttpClient> {
    api: Arc<U>,
    store: HistoryStore,
    downloader: Downloader<C>,
    validator: FfmpegValidator,
    cfg: ArchiveConfig,
}

impl<U: Upstream, C: HttpClient> Archiver<U, C> {
    pub fn new(
        api: Arc<U>,
        store: HistoryStore,
        downloader: Downloader<C>,
        cfg: ArchiveConfig,
    ) -> Self {
        let validator = FfmpegValidator::new(cfg.ffmpeg());
        Self {
            api,
            store,
            downloader,
            validator,
            cfg,
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.cfg
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub(crate) fn downloader(&self) -> &Downloader<C> {
        &self.downloader
    }

    /// Archive a single post given its URL or id.
    pub async fn archive_post(&self, target: &str, force: bool, cancel: &CancelToken) -> Result<()> {
        let post = guarded(cancel, self.api.get_post(target, true)).await?;
        let post_id = post.post_id().to_string();

        if post.is_video() {
            let wanted = self.cfg.wanted_kinds()?;
            for kind in wanted {
                if let Err(e) = self.ensure_video_asset(&post, kind, force, cancel).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    tracing::warn!(%post_id, %kind, error = %e, "could not archive video asset");
                }
            }
        } else if let Err(e) = self.ensure_album(&post, force, cancel).await {
            if e.is_fatal() {
                return Err(e);
            }
            tracing::warn!(%post_id, error = %e, "could not archive album");
        }

        self.finish_post(&post, force, cancel, &mut HashSet::new())
            .await
    }

    /// Archive everything a user posted since the configured cutoff,
    /// oldest first.
    pub async fn archive_profile(
        &self,
        user: &str,
        force: bool,
        progress: ProgressFn,
        cancel: &CancelToken,
    ) -> Result<()> {
        let wanted = self.cfg.wanted_kinds()?;
        let since = self.cfg.since_time()?;
        let mut seen_avatars = HashSet::new();

        let feed_progress = {
            let progress = progress.clone();
            Arc::new(move |count: usize| {
                progress(count, 0, &format!("{count} posts found"));
            })
        };
        let opts = FeedOptions {
            filter: None,
            on_progress: Some(feed_progress),
        };
        let posts = enumerate(
            self.api.as_ref(),
            user,
            &self.cfg,
            TruncateAfter(since),
            &opts,
            cancel,
        )
        .await?;

        if posts.is_empty() {
            tracing::info!(user, since = %self.cfg.since, "no new posts");
            progress(0, 0, "no new posts found");
            return Ok(());
        }

        let total = posts.len();
        for (i, post) in posts.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let post_id = post.post_id().to_string();
            progress(i + 1, total, &format!("checking {post_id}"));

            let outcome = if post.is_album() {
                self.process_album_in_feed(&post, force, cancel).await
            } else {
                self.process_video_in_feed(&post, &wanted, force, cancel).await
            };
            if let Err(e) = outcome {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(%post_id, error = %e, "error processing post, continuing");
            }

            self.finish_post(&post, force, cancel, &mut seen_avatars)
                .await?;
        }
        progress(total, total, "profile complete");
        Ok(())
    }

    /// Cover and avatar follow-ups shared by the post and profile paths.
    async fn finish_post(
        &self,
        post: &Post,
        force: bool,
        cancel: &CancelToken,
        seen_avatars: &mut HashSet<String>,
    ) -> Result<()> {
        if self.cfg.download_covers {
            if let Err(e) = self.ensure_cover(post, force, cancel).await {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(post_id = post.post_id(), error = %e, "could not archive cover");
            }
        }
        if self.cfg.download_avatars {
            if let Err(e) = self.ensure_avatar(post, force, seen_avatars, cancel).await {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(
                    author = %post.author.unique_id,
                    error = %e,
                    "could not archive avatar"
                );
            }
        }
        Ok(())
    }

    /// The per-video-kind decision table.
    async fn process_video_in_feed(
        &self,
        post: &Post,
        wanted: &[AssetKind],
        force: bool,
        cancel: &CancelToken,
    ) -> Result<()> {
        let post_id = post.post_id().to_string();

        if force {
            // One full fetch, then the download path for every kind,
            // ignoring history and filesystem state.
            let full = match guarded(
                cancel,
                get_post_retrying(self.api.as_ref(), &post_id, self.cfg.retry_on_429, cancel),
            )
            .await
            {
                Ok(full) => full,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!(%post_id, error = %e, "could not fetch full post details");
                    return Ok(());
                }
            };
            for &kind in wanted {
                if let Err(e) = self.ensure_video_asset(&full, kind, true, cancel).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    tracing::warn!(%post_id, %kind, error = %e, "forced download failed");
                }
            }
            return Ok(());
        }

        for &kind in wanted {
            if self.store.asset_exists(&post_id, kind).await? {
                continue;
            }

            let path = paths::asset_path(&self.cfg.download_path, post, kind);
            let size_on_disk = match tokio::fs::metadata(&path).await {
                Ok(meta) => Some(meta.len()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    tracing::warn!(%post_id, path = %path.display(), error = %e, "stat failed");
                    None
                }
            };

            let Some(size_on_disk) = size_on_disk else {
                if let Err(e) = self.ensure_video_asset(post, kind, true, cancel).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    tracing::warn!(%post_id, %kind, error = %e, "download failed");
                }
                continue;
            };

            // The file exists; adopt it if it checks out, else replace it.
            let mut adopt = true;
            if kind == AssetKind::Sd && post.size > 0 && size_on_disk != post.size as u64 {
                tracing::info!(
                    %post_id,
                    expected = post.size,
                    actual = size_on_disk,
                    "local sd file has wrong size"
                );
                adopt = false;
            }
            if adopt && self.validator.is_configured() {
                match self.validator.validate(&path).await {
                    Ok(true) => {}
                    Ok(false) => adopt = false,
                    Err(e) => {
                        tracing::warn!(%post_id, error = %e, "validation errored");
                        adopt = false;
                    }
                }
            }

            if adopt {
                match self.adopt_local_asset(post, kind, &path).await {
                    Ok(()) => continue,
                    Err(e) => {
                        tracing::warn!(%post_id, %kind, error = %e, "adoption failed, re-downloading");
                    }
                }
            }
            if let Err(e) = self.ensure_video_asset(post, kind, true, cancel).await {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(%post_id, %kind, error = %e, "re-download failed");
            }
        }
        Ok(())
    }

    /// Record an existing, validated local file without re-fetching.
    async fn adopt_local_asset(
        &self,
        post: &Post,
        kind: AssetKind,
        path: &std::path::Path,
    ) -> Result<()> {
        let sha = file_sha256(path).await?;
        self.store
            .upsert_asset(
                post.post_id(),
                &post.author.unique_id,
                post.create_time,
                kind,
                &sha,
            )
            .await?;
        tracing::info!(post_id = post.post_id(), %kind, "adopted existing file");
        self.save_title(post)
    }

    /// Make sure one video quality exists on disk and in history.
    async fn ensure_video_asset(
        &self,
        post: &Post,
        kind: AssetKind,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<()> {
        let post_id = post.post_id().to_string();
        if !force && self.store.asset_exists(&post_id, kind).await? {
            tracing::debug!(%post_id, %kind, "already archived");
            return Ok(());
        }

        let fetch_kind = video_fetch_kind(kind)?;
        let dest = paths::asset_path(&self.cfg.download_path, post, kind);
        let mut working = post.clone();
        let sha = fetch_asset(
            self.api.as_ref(),
            &self.downloader,
            &self.validator,
            &mut working,
            &fetch_kind,
            &dest,
            &self.cfg.retry_options(),
            cancel,
        )
        .await?;

        self.store
            .upsert_asset(
                &post_id,
                &post.author.unique_id,
                post.create_time,
                kind,
                &sha,
            )
            .await?;
        tracing::info!(%post_id, %kind, "archived video asset");
        self.save_title(post)
    }

    /// Album handling inside a feed: cheap completeness check first,
    /// then a detail refresh before touching photos.
    async fn process_album_in_feed(
        &self,
        post: &Post,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<()> {
        let post_id = post.post_id().to_string();
        let total = post.images.len();
        if total == 0 {
            tracing::warn!(%post_id, "album post carries no images, skipping");
            return Ok(());
        }

        if !force && self.store.album_photo_count(&post_id).await? >= total {
            tracing::debug!(%post_id, "album already complete");
            return Ok(());
        }

        let full = match guarded(
            cancel,
            get_post_retrying(self.api.as_ref(), &post_id, self.cfg.retry_on_429, cancel),
        )
        .await
        {
            Ok(full) => full,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(%post_id, error = %e, "could not refresh album details");
                return Ok(());
            }
        };
        if !full.is_album() {
            tracing::warn!(%post_id, "post is no longer an album after refresh, skipping");
            return Ok(());
        }

        self.ensure_album(&full, force, cancel).await
    }

    /// Fetch and record every photo of an album.
    ///
    /// Starts by deleting any row under the bare post id: legacy
    /// histories kept one row per album, which the per-photo rows
    /// replace. The delete is idempotent.
    async fn ensure_album(&self, post: &Post, force: bool, cancel: &CancelToken) -> Result<()> {
        let post_id = post.post_id().to_string();
        let total = post.images.len();
        tracing::info!(%post_id, photos = total, "processing album");

        if let Err(e) = self.store.delete_post(&post_id).await {
            tracing::warn!(%post_id, error = %e, "album migration delete failed");
        }

        for (idx, url) in post.images.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let photo_num = idx + 1;
            let photo_id = paths::album_photo_id(&post_id, photo_num, total);

            if !force && self.store.asset_exists(&photo_id, AssetKind::AlbumPhoto).await? {
                continue;
            }

            let dest = paths::album_photo_path(&self.cfg.download_path, post, photo_num);
            let mut working = post.clone();
            let sha = match fetch_asset(
                self.api.as_ref(),
                &self.downloader,
                &self.validator,
                &mut working,
                &FetchKind::Photo(url.clone()),
                &dest,
                &self.cfg.retry_options(),
                cancel,
            )
            .await
            {
                Ok(sha) => sha,
                Err(e) => {
                    let e = Error::from(e);
                    if e.is_fatal() {
                        return Err(e);
                    }
                    tracing::warn!(%photo_id, error = %e, "could not download album photo");
                    continue;
                }
            };

            if let Err(e) = self
                .store
                .upsert_asset(
                    &photo_id,
                    &post.author.unique_id,
                    post.create_time,
                    AssetKind::AlbumPhoto,
                    &sha,
                )
                .await
            {
                tracing::warn!(%photo_id, error = %e, "could not record album photo");
            }
        }
        self.save_title(post)
    }

    /// Fetch and record the configured cover variant (no ffmpeg pass).
    async fn ensure_cover(&self, post: &Post, force: bool, cancel: &CancelToken) -> Result<()> {
        let (kind, url) = self.cfg.cover_selection(post);
        let post_id = post.post_id().to_string();
        if url.is_empty() {
            return Err(Error::Config(format!(
                "post {post_id} has no URL for cover type '{}'",
                self.cfg.cover_type
            )));
        }

        if !force && self.store.asset_exists(&post_id, kind).await? {
            return Ok(());
        }

        let dest = paths::asset_path(&self.cfg.download_path, post, kind);
        let sha = self.downloader.fetch_hashed(url, &dest, 0, cancel).await?;
        self.store
            .upsert_asset(
                &post_id,
                &post.author.unique_id,
                post.create_time,
                kind,
                &sha,
            )
            .await?;
        tracing::info!(%post_id, %kind, "archived cover");
        Ok(())
    }

    /// Backfill covers for history rows that lack one.
    pub async fn covers_for_user(
        &self,
        user: &str,
        progress: ProgressFn,
        cancel: &CancelToken,
    ) -> Result<()> {
        let records = self.store.posts_by_author(user).await?;
        if records.is_empty() {
            tracing::info!(user, "no posts in history; archive the user first");
            progress(0, 0, "no posts in history");
            return Ok(());
        }
        let total = records.len();
        for (i, record) in records.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            progress(i + 1, total, &format!("checking {}", record.id));
            if record.has_any_cover {
                continue;
            }
            // Composite ids are album photos, never base posts.
            if record.id.contains('_') {
                continue;
            }
            let post = match guarded(
                cancel,
                get_post_retrying(self.api.as_ref(), &record.id, self.cfg.retry_on_429, cancel),
            )
            .await
            {
                Ok(post) => post,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!(post_id = %record.id, error = %e, "could not fetch post");
                    continue;
                }
            };
            if let Err(e) = self.ensure_cover(&post, false, cancel).await {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(post_id = post.post_id(), error = %e, "could not archive cover");
            }
        }
        Ok(())
    }

    /// Re-download wanted qualities for posts recorded without them.
    ///
    /// Reads history instead of the feed; every hit is force-fetched.
    pub async fn fix_profile(
        &self,
        user: &str,
        progress: ProgressFn,
        cancel: &CancelToken,
    ) -> Result<()> {
        for kind in self.cfg.wanted_kinds()? {
            progress(0, 0, &format!("checking history for missing {kind}"));
            let missing = self.store.missing_posts_by_author(user, kind).await?;
            if missing.is_empty() {
                progress(0, 0, &format!("no missing {kind} videos"));
                continue;
            }
            let total = missing.len();
            progress(0, total, &format!("found {total} missing {kind} videos"));
            for (i, record) in missing.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                progress(i + 1, total, &format!("processing {}", record.id));
                let post = match guarded(
                    cancel,
                    get_post_retrying(self.api.as_ref(), &record.id, self.cfg.retry_on_429, cancel),
                )
                .await
                {
                    Ok(post) => post,
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        tracing::warn!(post_id = %record.id, error = %e, "could not fetch post");
                        continue;
                    }
                };
                if let Err(e) = self.ensure_video_asset(&post, kind, true, cancel).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    tracing::warn!(post_id = post.post_id(), %kind, error = %e, "fix failed");
                }
            }
        }
        Ok(())
    }

    /// Write the title side file once per post, when enabled.
    fn save_title(&self, post: &Post) -> Result<()> {
        if !self.cfg.save_post_title || post.title.is_empty() {
            return Ok(());
        }
        let path = paths::title_path(&self.cfg.download_path, post);
        if path.exists() {
            return Ok(());
        }
        std::fs::write(&path, &post.title).map_err(|e| Error::Io {
            path: path.clone(),
            source: e,
        })?;
        tracing::debug!(post_id = post.post_id(), path = %path.display(), "saved title");
        Ok(())
    }
}
