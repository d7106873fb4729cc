//! Feed traversal and asset reconciliation.
//!
//! [`Archiver`] ties the upstream client, the download engine, and the
//! history store together: enumerate a user's posts oldest-first (with
//! a per-user TTL cache), then reconcile each post's wanted assets
//! against history and the filesystem, adopting valid local files and
//! fetching the rest.

mod avatar;
mod config;
mod error;
mod feed;
mod paths;
mod reconcile;

pub use config::ArchiveConfig;
pub use error::{Error, Result};
pub use feed::{
    albums_only, cache_path, enumerate, videos_only, FeedOptions, FeedProgressFn, FilterFn,
    TruncateAfter,
};
pub use paths::{
    album_photo_filename, album_photo_id, album_photo_path, asset_filename, asset_path,
    author_dir, avatar_filename, title_path,
};
pub use reconcile::{noop_progress, Archiver, ProgressFn};
