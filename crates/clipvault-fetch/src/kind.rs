//! What to fetch for a post, and where its URL comes from.

use clipvault_api::{Post, Upstream};

use crate::error::{Error, Result};

/// The concrete thing the retry harness is fetching.
///
/// Video qualities resolve their URL from the working post (or the
/// source-encode flow); an album photo carries its URL directly, since
/// photo URLs come only from the album's image list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchKind {
    Sd,
    Hd,
    Source,
    Photo(String),
}

impl FetchKind {
    pub fn name(&self) -> &'static str {
        match self {
            FetchKind::Sd => "sd",
            FetchKind::Hd => "hd",
            FetchKind::Source => "source",
            FetchKind::Photo(_) => "album_photo",
        }
    }

    /// HD/SD URLs go stale; these kinds re-fetch the post between
    /// retries. Source re-submits its task instead, and photo URLs are
    /// fixed.
    pub fn refreshes_post(&self) -> bool {
        matches!(self, FetchKind::Sd | FetchKind::Hd)
    }

    pub fn is_video_quality(&self) -> bool {
        !matches!(self, FetchKind::Photo(_))
    }
}

/// Resolve the download URL and expected size for `kind`.
pub async fn resolve_url<U: Upstream + ?Sized>(
    api: &U,
    post: &Post,
    kind: &FetchKind,
) -> Result<(String, u64)> {
    let (url, size) = match kind {
        FetchKind::Sd => (post.play.clone(), post.size),
        FetchKind::Hd => (post.hdplay.clone(), post.hd_size),
        FetchKind::Source => {
            let encode = api.source_encode(post.post_id()).await?;
            (encode.play_url, encode.size)
        }
        FetchKind::Photo(url) => (url.clone(), 0),
    };
    if url.is_empty() {
        return Err(Error::MissingUrl { kind: kind.name() });
    }
    Ok((url, size.max(0) as u64))
}
