//! The group protocol engine: drives fill and revoke across every group
//! cache this process holds, owning the engine-wide mutex the rest of
//! the workspace's crates assume callers respect.

pub mod engine;
pub mod fill;
pub mod queries;
pub mod revoke;

pub use engine::{BootstrapConfig, Engine};
pub use fill::{host_add_local_rank_to_cache, local_peer_info};
pub use revoke::host_request_revoke;
