//! Wire types shared across the workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A post as returned by the upstream.
///
/// A post is an album iff `images` is non-empty, otherwise a video;
/// the two are disjoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub id: String,
    /// Fallback identifier; some endpoints fill this instead of `id`.
    #[serde(default)]
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub create_time: i64,
    /// Medium-quality cover.
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub origin_cover: String,
    #[serde(default, rename = "ai_dynamic_cover")]
    pub dynamic_cover: String,
    /// SD playback URL and size in bytes.
    #[serde(default)]
    pub play: String,
    #[serde(default)]
    pub size: i64,
    /// HD playback URL and size in bytes.
    #[serde(default)]
    pub hdplay: String,
    #[serde(default)]
    pub hd_size: i64,
    #[serde(default)]
    pub author: Author,
    /// Photo URLs; non-empty exactly for albums.
    #[serde(default)]
    pub images: Vec<String>,
}

impl Post {
    /// The post identifier, falling back to `video_id` when `id` is empty.
    pub fn post_id(&self) -> &str {
        if self.id.is_empty() {
            &self.video_id
        } else {
            &self.id
        }
    }

    pub fn is_album(&self) -> bool {
        !self.images.is_empty()
    }

    pub fn is_video(&self) -> bool {
        !self.is_album()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    /// Stable username; keys the on-disk layout and history rows.
    #[serde(default)]
    pub unique_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
}

/// One page of a user's feed, newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFeedPage {
    #[serde(default, rename = "videos")]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub cursor: String,
    #[serde(default, rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "uniqueId")]
    pub unique_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, rename = "privateAccount")]
    pub private_account: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserStats {
    #[serde(default, rename = "followerCount")]
    pub follower_count: i64,
    #[serde(default, rename = "followingCount")]
    pub following_count: i64,
    #[serde(default, rename = "videoCount")]
    pub video_count: i64,
    #[serde(default, rename = "heartCount")]
    pub heart_count: i64,
}

/// Profile details, used by the `info` command.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserDetail {
    #[serde(default)]
    pub user: UserProfile,
    #[serde(default)]
    pub stats: UserStats,
}

/// Terminal result of the source-encode submit/poll flow.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceEncode {
    #[serde(default)]
    pub play_url: String,
    #[serde(default)]
    pub size: i64,
}

/// The kinds of downloadable artifacts associated with a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Sd,
    Hd,
    Source,
    CoverMedium,
    CoverOrigin,
    CoverDynamic,
    AlbumPhoto,
    Avatar,
}

impl AssetKind {
    /// Snake-case name used in filenames and database columns.
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Sd => "sd",
            AssetKind::Hd => "hd",
            AssetKind::Source => "source",
            AssetKind::CoverMedium => "cover_medium",
            AssetKind::CoverOrigin => "cover_origin",
            AssetKind::CoverDynamic => "cover_dynamic",
            AssetKind::AlbumPhoto => "album_photo",
            AssetKind::Avatar => "avatar",
        }
    }

    pub fn is_video_quality(self) -> bool {
        matches!(self, AssetKind::Sd | AssetKind::Hd | AssetKind::Source)
    }

    pub fn is_cover(self) -> bool {
        matches!(
            self,
            AssetKind::CoverMedium | AssetKind::CoverOrigin | AssetKind::CoverDynamic
        )
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
