//! The transport-side half of emission: a handle that reports whether a
//! send has completed.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    Done,
    InProgress,
    Err(String),
}

/// A callback invoked when an in-process/stepped transport delivers a
/// message to a locally registered endpoint: `(source_id, event_type,
/// header, payload)`.
pub type DeliverFn = Arc<dyn Fn(u64, u64, Option<Vec<u8>>, Vec<u8>) + Send + Sync>;

pub trait RequestHandle: Send {
    fn check(&mut self) -> RequestStatus;
}

/// A request that is already finished when constructed.
pub struct ImmediateRequest(pub RequestStatus);

impl RequestHandle for ImmediateRequest {
    fn check(&mut self) -> RequestStatus {
        self.0.clone()
    }
}
