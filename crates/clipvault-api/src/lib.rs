//! Upstream API access for clipvault.
//!
//! Everything that talks to the upstream goes through this crate:
//!
//! - [`RateLimiter`] - process-global minimum spacing between requests
//! - [`AddrRotator`] - round-robin outbound bind addresses with
//!   per-address exhaustion cool-down
//! - [`Api`] / [`Upstream`] - typed operations over the JSON envelope
//!
//! The [`Upstream`] trait is the seam for offline tests; [`Api`] is the
//! production implementation.

mod cancel;
mod client;
mod error;
mod limiter;
mod rotate;
mod types;

pub use cancel::{cancel_pair, CancelToken, Canceller};
pub use client::{get_post_retrying, Api, Transport, Upstream, MAX_FEED_PAGE};
pub use error::{Error, Result};
pub use limiter::{RateLimiter, DEFAULT_REQUEST_SPACING};
pub use rotate::{AddrRotator, DEFAULT_EXHAUSTION_TTL};
pub use types::{
    AssetKind, Author, Post, SourceEncode, UserDetail, UserFeedPage, UserProfile, UserStats,
};
