//! [`HistoryStore`], the durable record of archived assets.

use std::path::Path;

use chrono::Utc;
use clipvault_api::AssetKind;
use rusqlite::{params, OptionalExtension as _};

use crate::error::{Error, Result};
use crate::schema::SCHEMA;

/// A history row summary, as consumed by the covers and fix paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub id: String,
    pub author: String,
    pub create_time: i64,
    pub has_any_cover: bool,
}

/// History of archived assets, backed by a single SQLite file in WAL
/// mode.
///
/// All calls are serialized onto one background connection thread, so
/// writers never interleave; a WAL checkpoint is forced after every
/// upsert, leaving no uncommitted state behind an interrupt beyond the
/// last successful call.
///
/// Cloning is cheap; the inner connection is shared.
#[derive(Clone)]
pub struct HistoryStore {
    conn: tokio_rusqlite::Connection,
}

/// The `has_X`/`sha256_X` column pair recording an asset kind.
///
/// Album photos reuse the `hd` columns under their composite
/// `{post}_{k}_{N}` ids; avatars live in their own table.
fn columns(kind: AssetKind) -> Result<(&'static str, &'static str)> {
    match kind {
        AssetKind::Sd => Ok(("has_sd", "sha256_sd")),
        AssetKind::Hd => Ok(("has_hd", "sha256_hd")),
        AssetKind::Source => Ok(("has_source", "sha256_source")),
        AssetKind::CoverMedium => Ok(("has_cover_medium", "sha256_cover_medium")),
        AssetKind::CoverOrigin => Ok(("has_cover_origin", "sha256_cover_origin")),
        AssetKind::CoverDynamic => Ok(("has_cover_dynamic", "sha256_cover_dynamic")),
        AssetKind::AlbumPhoto => Ok(("has_hd", "sha256_hd")),
        AssetKind::Avatar => Err(Error::UnsupportedKind(kind)),
    }
}

impl HistoryStore {
    /// Open (or create) the store at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir).map_err(Error::CreateDir)?;
        }
        let path = path.as_ref().to_path_buf();
        let conn = tokio_rusqlite::Connection::open(path.clone()).await?;
        let store = Self { conn };
        store.init().await?;
        tracing::debug!(path = %path.display(), "opened history store");
        Ok(store)
    }

    /// An in-memory store, for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                // journal_mode reports the resulting mode as a row.
                conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Whether `asset_id` already carries `kind`.
    ///
    /// `asset_id` is the post id, or the composite id for album photos.
    /// A missing row answers `false`, not an error.
    pub async fn asset_exists(&self, asset_id: &str, kind: AssetKind) -> Result<bool> {
        let (has, _) = columns(kind)?;
        let id = asset_id.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {has} FROM posts WHERE id = ?1");
                let got: Option<bool> = conn
                    .query_row(&sql, params![id], |row| row.get(0))
                    .optional()?;
                Ok(got.unwrap_or(false))
            })
            .await?;
        Ok(exists)
    }

    /// Record `kind` for a post: insert or update, setting the has flag
    /// and hash atomically, then force a WAL checkpoint.
    pub async fn upsert_asset(
        &self,
        asset_id: &str,
        author: &str,
        create_time: i64,
        kind: AssetKind,
        sha256: &str,
    ) -> Result<()> {
        let (has, sha) = columns(kind)?;
        let id = asset_id.to_string();
        let author = author.to_string();
        let sha256 = sha256.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "INSERT INTO posts (id, author, create_time, {has}, {sha}, updated_at)
                     VALUES (?1, ?2, ?3, 1, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                         {has} = 1,
                         {sha} = excluded.{sha},
                         author = excluded.author,
                         create_time = excluded.create_time,
                         updated_at = excluded.updated_at"
                );
                conn.execute(&sql, params![id, author, create_time, sha256, now])?;
                // Returns a (busy, log, checkpointed) row; only success matters.
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Delete a row by exact id. Used to migrate legacy single-row
    /// album entries before per-photo rows are written; deleting a
    /// missing row is a no-op.
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        let id = post_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// How many photo rows exist under `{post_id}_`.
    pub async fn album_photo_count(&self, post_id: &str) -> Result<usize> {
        let pattern = format!("{}\\_%", post_id);
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM posts WHERE id LIKE ?1 ESCAPE '\\'",
                    params![pattern],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }

    /// All rows for an author, newest first.
    pub async fn posts_by_author(&self, author: &str) -> Result<Vec<PostRecord>> {
        let author = author.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, author, create_time,
                            (has_cover_medium OR has_cover_origin OR has_cover_dynamic)
                     FROM posts WHERE author = ?1 ORDER BY create_time DESC",
                )?;
                let rows = stmt
                    .query_map(params![author], |row| {
                        Ok(PostRecord {
                            id: row.get(0)?,
                            author: row.get(1)?,
                            create_time: row.get(2)?,
                            has_any_cover: row.get(3)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Rows for an author missing `kind` (`sd` or `hd` only), newest
    /// first. Composite ids (album photos) are excluded; they are
    /// never base posts.
    pub async fn missing_posts_by_author(
        &self,
        author: &str,
        kind: AssetKind,
    ) -> Result<Vec<PostRecord>> {
        let has = match kind {
            AssetKind::Sd => "has_sd",
            AssetKind::Hd => "has_hd",
            _ => return Err(Error::UnsupportedKind(kind)),
        };
        let author = author.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT id, author, create_time,
                            (has_cover_medium OR has_cover_origin OR has_cover_dynamic)
                     FROM posts
                     WHERE author = ?1 AND {has} = 0 AND id NOT LIKE '%\\_%' ESCAPE '\\'
                     ORDER BY create_time DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![author], |row| {
                        Ok(PostRecord {
                            id: row.get(0)?,
                            author: row.get(1)?,
                            create_time: row.get(2)?,
                            has_any_cover: row.get(3)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Whether this exact avatar content is already recorded.
    pub async fn avatar_exists(&self, author: &str, sha256: &str) -> Result<bool> {
        let author = author.to_string();
        let sha256 = sha256.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let got: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM avatars WHERE author = ?1 AND sha256 = ?2",
                        params![author, sha256],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(got.is_some())
            })
            .await?;
        Ok(exists)
    }

    /// Record an avatar. Append-only; re-recording is a no-op.
    pub async fn add_avatar(&self, author: &str, sha256: &str) -> Result<()> {
        let author = author.to_string();
        let sha256 = sha256.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO avatars (author, sha256, downloaded_at)
                     VALUES (?1, ?2, ?3)",
                    params![author, sha256, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn close(self) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }
}
