//! CLI configuration: file, environment, then flag overrides.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clipvault_core::ArchiveConfig;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "clipvault";
pub const DEFAULT_BASE_URL: &str = "https://tikwm.com/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Archival behavior (mirrors clipvault_core::ArchiveConfig).
    pub download_path: PathBuf,
    pub quality: String,
    pub since: String,
    pub retry_on_429: bool,
    pub download_covers: bool,
    pub cover_type: String,
    pub download_avatars: bool,
    pub save_post_title: bool,
    pub ffmpeg_path: String,
    pub feed_cache: bool,
    pub feed_cache_ttl_secs: u64,
    pub cache_root: PathBuf,

    // CLI and daemon surface.
    pub targets_file: PathBuf,
    pub database_path: PathBuf,
    pub log_path: PathBuf,
    pub base_url: String,
    /// Comma-separated outbound bind IPs or interface names; empty
    /// uses default routing.
    pub bind_address: String,
    /// Issue a live GET per bind address at startup to verify routing.
    pub probe_bind_addresses: bool,
    pub request_spacing_ms: u64,
    /// 0 means one worker per CPU core.
    pub max_workers: usize,
    pub daemon: bool,
    pub daemon_poll_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let archive = ArchiveConfig::default();
        let (data_dir, cache_dir) = app_dirs();
        Self {
            download_path: archive.download_path,
            quality: archive.quality,
            since: archive.since,
            retry_on_429: archive.retry_on_429,
            download_covers: archive.download_covers,
            cover_type: archive.cover_type,
            download_avatars: archive.download_avatars,
            save_post_title: archive.save_post_title,
            ffmpeg_path: archive.ffmpeg_path,
            feed_cache: archive.feed_cache,
            feed_cache_ttl_secs: archive.feed_cache_ttl_secs,
            cache_root: cache_dir,
            targets_file: data_dir.join("targets.txt"),
            database_path: data_dir.join("history.db"),
            log_path: data_dir.join("app.log"),
            base_url: DEFAULT_BASE_URL.into(),
            bind_address: String::new(),
            probe_bind_addresses: false,
            request_spacing_ms: 1250,
            max_workers: 0,
            daemon: false,
            daemon_poll_secs: 60,
        }
    }
}

fn app_dirs() -> (PathBuf, PathBuf) {
    match ProjectDirs::from("", "", APP_NAME) {
        Some(dirs) => (dirs.data_dir().to_path_buf(), dirs.cache_dir().to_path_buf()),
        None => (
            PathBuf::from("./clipvault-data"),
            PathBuf::from("./clipvault-cache"),
        ),
    }
}

impl Settings {
    /// Load from `path` (or the default config location), layered with
    /// `CLIPVAULT_*` environment variables. A missing config file is
    /// created with commented defaults first.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };
        if !config_path.exists() {
            write_default_config(&config_path)
                .with_context(|| format!("creating default config at {}", config_path.display()))?;
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(config_path.clone()).required(false))
            .add_source(config::Environment::with_prefix("CLIPVAULT"))
            .build()
            .context("failed to read configuration")?;
        let settings: Settings = settings
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        Ok(settings)
    }

    pub fn archive_config(&self) -> ArchiveConfig {
        ArchiveConfig {
            download_path: self.download_path.clone(),
            quality: self.quality.clone(),
            since: self.since.clone(),
            retry_on_429: self.retry_on_429,
            download_covers: self.download_covers,
            cover_type: self.cover_type.clone(),
            download_avatars: self.download_avatars,
            save_post_title: self.save_post_title,
            ffmpeg_path: self.ffmpeg_path.clone(),
            feed_cache: self.feed_cache,
            feed_cache_ttl_secs: self.feed_cache_ttl_secs,
            cache_root: self.cache_root.clone(),
        }
    }

    pub fn worker_count(&self) -> usize {
        if self.max_workers > 0 {
            return self.max_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

fn default_config_path() -> PathBuf {
    match ProjectDirs::from("", "", APP_NAME) {
        Some(dirs) => dirs.config_dir().join("config.toml"),
        None => PathBuf::from("./clipvault.toml"),
    }
}

fn write_default_config(path: &Path) -> anyhow::Result<()> {
    let defaults = Settings::default();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = format!(
        r#"# clipvault configuration.

# Where media is archived; each author gets a subdirectory.
download_path = {download_path:?}
# Video quality to archive: "source", "hd", "sd", or "all".
quality = {quality:?}
# Ignore posts created before this instant (YYYY-MM-DD HH:MM:SS).
since = {since:?}
# Back off and retry on upstream rate limits instead of failing.
retry_on_429 = {retry_on_429}
# Also archive post covers (see cover_type).
download_covers = {download_covers}
# Cover variant: "cover"/"medium", "origin"/"small", or "dynamic".
cover_type = {cover_type:?}
# Also archive author avatars, deduplicated by content hash.
download_avatars = {download_avatars}
# Write each post's title to a side .txt file.
save_post_title = {save_post_title}
# Path to ffmpeg, used to validate downloaded videos. Empty disables
# validation.
ffmpeg_path = {ffmpeg_path:?}
# Cache user feeds on disk and reuse them within the TTL.
feed_cache = {feed_cache}
feed_cache_ttl_secs = {feed_cache_ttl_secs}

# One target per line; lines starting with # are comments.
targets_file = {targets_file:?}
# SQLite history of archived assets.
database_path = {database_path:?}
log_path = {log_path:?}

base_url = {base_url:?}
# Comma-separated outbound bind IPs or interface names.
bind_address = {bind_address:?}
# Minimum milliseconds between upstream requests.
request_spacing_ms = {request_spacing_ms}
# 0 = one worker per CPU core.
max_workers = {max_workers}

# Keep running, watching the targets file for edits.
daemon = {daemon}
daemon_poll_secs = {daemon_poll_secs}
"#,
        download_path = defaults.download_path,
        quality = defaults.quality,
        since = defaults.since,
        retry_on_429 = defaults.retry_on_429,
        download_covers = defaults.download_covers,
        cover_type = defaults.cover_type,
        download_avatars = defaults.download_avatars,
        save_post_title = defaults.save_post_title,
        ffmpeg_path = defaults.ffmpeg_path,
        feed_cache = defaults.feed_cache,
        feed_cache_ttl_secs = defaults.feed_cache_ttl_secs,
        targets_file = defaults.targets_file,
        database_path = defaults.database_path,
        log_path = defaults.log_path,
        base_url = defaults.base_url,
        bind_address = defaults.bind_address,
        request_spacing_ms = defaults.request_spacing_ms,
        max_workers = defaults.max_workers,
        daemon = defaults.daemon,
        daemon_poll_secs = defaults.daemon_poll_secs,
    );
    std::fs::write(path, content)?;
    Ok(())
}
