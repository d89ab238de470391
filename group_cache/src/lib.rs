//! The group cache: per-group rank table, ingest algorithm, and the
//! revoke hard reset.

pub mod cache;
pub mod rank_entry;

pub use cache::{GroupCache, PendingRevoke, Persistent, Revokes};
pub use rank_entry::RankEntry;
