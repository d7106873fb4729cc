//! Archival behavior knobs, shared by every command.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use clipvault_api::{AssetKind, Post};
use clipvault_fetch::RetryOptions;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Root under which each author gets a directory.
    pub download_path: PathBuf,
    /// Video quality to archive: "source", "hd", "sd", or "all".
    pub quality: String,
    /// Ignore posts created before this instant (YYYY-MM-DD HH:MM:SS).
    pub since: String,
    /// Back off and retry on upstream rate limits instead of failing.
    pub retry_on_429: bool,
    pub download_covers: bool,
    /// Cover variant: "cover"/"medium", "origin"/"small", or "dynamic".
    pub cover_type: String,
    pub download_avatars: bool,
    /// Write each post's title to a side .txt file.
    pub save_post_title: bool,
    /// Path to ffmpeg for video validation; empty disables validation.
    pub ffmpeg_path: String,
    pub feed_cache: bool,
    pub feed_cache_ttl_secs: u64,
    /// Root for feed cache files ({cache_root}/feeds/{user}.json).
    pub cache_root: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            download_path: PathBuf::from("./downloads"),
            quality: "source".into(),
            since: "1970-01-01 00:00:00".into(),
            retry_on_429: false,
            download_covers: false,
            cover_type: "cover".into(),
            download_avatars: false,
            save_post_title: false,
            ffmpeg_path: String::new(),
            feed_cache: false,
            feed_cache_ttl_secs: 3600,
            cache_root: PathBuf::from("./cache"),
        }
    }
}

impl ArchiveConfig {
    /// Video kinds to archive, in reconciliation order.
    pub fn wanted_kinds(&self) -> Result<Vec<AssetKind>> {
        match self.quality.to_lowercase().as_str() {
            "source" => Ok(vec![AssetKind::Source]),
            "hd" => Ok(vec![AssetKind::Hd]),
            "sd" => Ok(vec![AssetKind::Sd]),
            "all" => Ok(vec![AssetKind::Source, AssetKind::Hd, AssetKind::Sd]),
            other => Err(Error::Config(format!(
                "invalid quality '{other}', must be 'source', 'hd', 'sd', or 'all'"
            ))),
        }
    }

    /// The configured cover kind and its URL on `post`.
    pub fn cover_selection<'a>(&self, post: &'a Post) -> (AssetKind, &'a str) {
        match self.cover_type.to_lowercase().as_str() {
            "origin" | "small" => (AssetKind::CoverOrigin, &post.origin_cover),
            "dynamic" => (AssetKind::CoverDynamic, &post.dynamic_cover),
            _ => (AssetKind::CoverMedium, &post.cover),
        }
    }

    pub fn since_time(&self) -> Result<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(&self.since, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| Error::Config(format!("invalid since date '{}': {e}", self.since)))?;
        Ok(naive.and_utc())
    }

    pub fn ffmpeg(&self) -> Option<PathBuf> {
        if self.ffmpeg_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.ffmpeg_path))
        }
    }

    pub fn feed_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.feed_cache_ttl_secs)
    }

    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            retry_on_429: self.retry_on_429,
            ..RetryOptions::default()
        }
    }
}
