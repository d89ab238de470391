//! Collaborator contracts for the wire transport.
//!
//! This crate specifies the boundary the core event channel calls
//! through -- a typed send, a completion check, and endpoint resolution
//! -- without implementing an actual RDMA-capable messaging substrate.
//! Two implementations are provided: [`in_process::InProcessTransport`]
//! (a same-process loopback used for single-host runs) and
//! [`stepped::SteppedTransport`] (a test harness that lets a test choose
//! exactly when an in-flight send completes, needed to exercise the
//! revoke-during-send race). A minimal out-of-band TCP handshake
//! connector for peer bootstrap is also included; it resolves
//! endpoints, it does not carry RDMA traffic.

pub mod endpoint;
pub mod in_process;
pub mod request;
pub mod stepped;
pub mod tcp_handshake;

pub use endpoint::{EndpointId, EndpointTable};
pub use in_process::InProcessTransport;
pub use request::{DeliverFn, RequestHandle, RequestStatus};
pub use stepped::SteppedTransport;

/// Sends typed messages to a resolved endpoint and reports completion.
///
/// `send` must be safe to call with a zero-length `payload` (a type-only
/// notification).
pub trait Transport: Send + Sync {
    fn send(
        &self,
        dest: EndpointId,
        event_type: u64,
        header: Option<&[u8]>,
        payload: &[u8],
    ) -> Box<dyn RequestHandle>;

    /// Registers a delivery callback for the local endpoint `id`. Only
    /// the in-process implementations use this; a real transport would
    /// instead listen on a socket and invoke the event channel's receive
    /// dispatch from its own progress loop.
    fn register_endpoint(&self, id: EndpointId, deliver: DeliverFn);
}
