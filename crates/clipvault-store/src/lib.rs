//! Durable, single-file history of archived assets.
//!
//! Reconciliation treats this store as the source of truth for what has
//! already been archived: a post row carries one has/sha column pair
//! per quality and cover kind, album photos get one row per photo under
//! composite ids, and avatars are deduplicated per author by content
//! hash.

mod error;
mod schema;
mod store;

pub use error::{Error, Result};
pub use store::{HistoryStore, PostRecord};
