//! A same-process loopback transport: delivery happens synchronously
//! inside `send`, so every request completes `Done` immediately. Useful
//! for single-host runs and for tests that don't need to exercise the
//! `InProgress` window (use [`crate::stepped::SteppedTransport`] for
//! those).

use crate::endpoint::EndpointId;
use crate::request::{DeliverFn, ImmediateRequest, RequestHandle, RequestStatus};
use crate::Transport;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

pub struct InProcessTransport {
    self_id: u64,
    peers: Mutex<HashMap<u64, DeliverFn>>,
}

impl InProcessTransport {
    pub fn new(self_id: u64) -> Self {
        InProcessTransport {
            self_id,
            peers: Mutex::new(HashMap::new()),
        }
    }
}

impl Transport for InProcessTransport {
    fn send(
        &self,
        dest: EndpointId,
        event_type: u64,
        header: Option<&[u8]>,
        payload: &[u8],
    ) -> Box<dyn RequestHandle> {
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        match peers.get(&dest.0) {
            Some(deliver) => {
                let deliver = deliver.clone();
                drop(peers);
                debug!(
                    "in-process transport delivering event_type {} from {} to {}",
                    event_type, self.self_id, dest.0
                );
                deliver(
                    self.self_id,
                    event_type,
                    header.map(|h| h.to_vec()),
                    payload.to_vec(),
                );
                Box::new(ImmediateRequest(RequestStatus::Done))
            }
            None => {
                warn!("in-process transport has no endpoint registered for {}", dest.0);
                Box::new(ImmediateRequest(RequestStatus::Err(format!(
                    "unknown endpoint {}",
                    dest.0
                ))))
            }
        }
    }

    fn register_endpoint(&self, id: EndpointId, deliver: DeliverFn) {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.0, deliver);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test_log::test]
    fn delivers_synchronously() {
        let t = InProcessTransport::new(1);
        let received = Arc::new(AtomicU64::new(0));
        let received2 = received.clone();
        t.register_endpoint(
            EndpointId(2),
            Arc::new(move |_src, event_type, _hdr, _payload| {
                received2.store(event_type, Ordering::SeqCst);
            }),
        );
        let mut req = t.send(EndpointId(2), 55, None, &[]);
        assert_eq!(req.check(), RequestStatus::Done);
        assert_eq!(received.load(Ordering::SeqCst), 55);
    }

    #[test_log::test]
    fn unknown_endpoint_errors() {
        let t = InProcessTransport::new(1);
        let mut req = t.send(EndpointId(9), 1, None, &[]);
        assert!(matches!(req.check(), RequestStatus::Err(_)));
    }
}
