//! Identifiers, wire-level rank entry layout, and the shared error type
//! that every other crate in the workspace builds on.

pub mod error;
pub mod ids;
pub mod wire;

pub use error::EngineError;
pub use ids::{GroupUid, HostUid, SeqNum, SpGid};
pub use wire::{decode_batch, encode_batch, PeerInfo, RankEntryWire, MAX_ADDR_LEN, MAX_SHADOW_SPS};
