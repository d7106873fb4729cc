//! Content-addressed avatar archival.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use clipvault_api::{CancelToken, Post, Upstream};
use clipvault_fetch::HttpClient;

use crate::error::{Error, Result};
use crate::paths;
use crate::reconcile::Archiver;

impl<U: Upstream, C: HttpClient> Archiver<U, C> {
    /// Archive the author's avatar if its content is new.
    ///
    /// Runs at most once per author per session (`seen`). The avatar is
    /// downloaded to a temporary name first so the hash can be checked
    /// against history before committing; known content is discarded,
    /// new content is renamed to its timestamped final name and
    /// recorded.
    pub(crate) async fn ensure_avatar(
        &self,
        post: &Post,
        force: bool,
        seen: &mut HashSet<String>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let author = post.author.unique_id.clone();
        if !seen.insert(author.clone()) {
            return Ok(());
        }
        if post.author.avatar.is_empty() {
            tracing::debug!(%author, "no avatar URL");
            return Ok(());
        }

        let dir = paths::author_dir(&self.config().download_path, &author);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let temp = dir.join(format!(".avatar_{nanos}.tmp"));

        let sha = self
            .downloader()
            .fetch_hashed(&post.author.avatar, &temp, 0, cancel)
            .await?;

        let exists = match self.store().avatar_exists(&author, &sha).await {
            Ok(exists) => exists,
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                return Err(e.into());
            }
        };
        if exists && !force {
            tracing::debug!(%author, %sha, "avatar content already archived");
            let _ = std::fs::remove_file(&temp);
            return Ok(());
        }

        let final_path = dir.join(paths::avatar_filename(&author, Utc::now()));
        tokio::fs::rename(&temp, &final_path)
            .await
            .map_err(|e| {
                let _ = std::fs::remove_file(&temp);
                Error::Io {
                    path: final_path.clone(),
                    source: e,
                }
            })?;

        self.store().add_avatar(&author, &sha).await?;
        tracing::info!(%author, path = %final_path.display(), "archived new avatar");
        Ok(())
    }
}
