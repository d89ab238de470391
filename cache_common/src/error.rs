//! Error kinds shared by every crate in the workspace.

use tracing::error;

/// Recoverable and fatal outcomes the group cache can produce.
///
/// This is a plain enum, not a `thiserror`-derived type: none of these
/// variants need more than a short, pre-formatted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The caller's process is not a member of the group.
    NotInGroup,
    /// The requested entity does not exist in the group (yet).
    NotFound,
    /// A structural invariant of a group cache was violated.
    CacheInconsistent(String),
    /// An incoming entry's sequence number did not match the cache's.
    SeqNumMismatch { expected: u64, got: u64 },
    /// The transport reported a send/receive failure.
    TransportError(String),
    /// `register` was called twice for the same event type.
    AlreadyRegistered,
    /// A bounded pool has no free slots and cannot grow further.
    PoolExhausted,
    /// The group was revoked while the caller's request was pending.
    Revoked,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotInGroup => write!(f, "not in group"),
            EngineError::NotFound => write!(f, "not found"),
            EngineError::CacheInconsistent(msg) => write!(f, "cache inconsistent: {msg}"),
            EngineError::SeqNumMismatch { expected, got } => {
                write!(f, "seq_num mismatch: expected {expected}, got {got}")
            }
            EngineError::TransportError(msg) => write!(f, "transport error: {msg}"),
            EngineError::AlreadyRegistered => write!(f, "event type already registered"),
            EngineError::PoolExhausted => write!(f, "pool exhausted"),
            EngineError::Revoked => write!(f, "group revoked"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Reports a fatal invariant violation in a group cache.
///
/// In debug builds this aborts immediately via `panic!`, so the violation
/// shows up in a backtrace at the point of detection. In release builds
/// it logs at `error!` and returns the error so the caller can unwind
/// instead of corrupting the directory further.
#[track_caller]
pub fn report_fatal(err: EngineError) -> EngineError {
    if cfg!(debug_assertions) {
        panic!("fatal group cache invariant violated: {err}");
    }
    error!("fatal group cache invariant violated: {err}");
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_human_readable() {
        let e = EngineError::SeqNumMismatch {
            expected: 3,
            got: 2,
        };
        assert_eq!(e.to_string(), "seq_num mismatch: expected 3, got 2");
    }
}
