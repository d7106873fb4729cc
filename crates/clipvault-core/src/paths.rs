//! On-disk layout.
//!
//! Everything for one author lives under
//! `<download-root>/<author-unique-id>/`, with flat, sortable
//! filenames stamped by post creation date.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use clipvault_api::{AssetKind, Post};

pub fn author_dir(root: &Path, author: &str) -> PathBuf {
    root.join(author)
}

fn date_stamp(create_time: i64) -> String {
    Utc.timestamp_opt(create_time, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
        .format("%Y-%m-%d")
        .to_string()
}

fn base_name(post: &Post) -> String {
    format!(
        "{}_{}_{}",
        post.author.unique_id,
        date_stamp(post.create_time),
        post.post_id()
    )
}

/// `{author}_{YYYY-MM-DD}_{postID}_{kind}.mp4` / `.jpg`.
pub fn asset_filename(post: &Post, kind: AssetKind) -> String {
    let ext = if kind.is_cover() { "jpg" } else { "mp4" };
    format!("{}_{}.{ext}", base_name(post), kind.as_str())
}

/// `{author}_{YYYY-MM-DD}_{postID}_{photoNum}.jpg`, 1-based.
pub fn album_photo_filename(post: &Post, photo_num: usize) -> String {
    format!("{}_{photo_num}.jpg", base_name(post))
}

/// `{author}_{YYYY-MM-DD}_{postID}.txt`, one per post.
pub fn title_filename(post: &Post) -> String {
    format!("{}.txt", base_name(post))
}

/// `{author}_{UTCtimestamp}_avatar.jpg`.
pub fn avatar_filename(author: &str, now: DateTime<Utc>) -> String {
    format!("{author}_{}_avatar.jpg", now.format("%Y%m%dT%H%M%SZ"))
}

/// Full path for a video quality or cover asset.
pub fn asset_path(root: &Path, post: &Post, kind: AssetKind) -> PathBuf {
    author_dir(root, &post.author.unique_id).join(asset_filename(post, kind))
}

pub fn album_photo_path(root: &Path, post: &Post, photo_num: usize) -> PathBuf {
    author_dir(root, &post.author.unique_id).join(album_photo_filename(post, photo_num))
}

pub fn title_path(root: &Path, post: &Post) -> PathBuf {
    author_dir(root, &post.author.unique_id).join(title_filename(post))
}

/// History id of one album photo: `{postID}_{k}_{N}`, `k` 1-based.
pub fn album_photo_id(post_id: &str, photo_num: usize, album_size: usize) -> String {
    format!("{post_id}_{photo_num}_{album_size}")
}
