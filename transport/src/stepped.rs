//! A transport that defers delivery until the test explicitly steps it,
//! so a test can hold an emission in `InProgress` and observe behavior
//! that must happen before it completes (the revoke-during-send race).

use crate::endpoint::EndpointId;
use crate::request::{DeliverFn, RequestHandle, RequestStatus};
use crate::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct PendingSend {
    dest: u64,
    event_type: u64,
    header: Option<Vec<u8>>,
    payload: Vec<u8>,
    state: Arc<Mutex<RequestStatus>>,
}

pub struct SteppedTransport {
    self_id: u64,
    peers: Mutex<HashMap<u64, DeliverFn>>,
    pending: Mutex<Vec<PendingSend>>,
}

struct SteppedRequestHandle {
    state: Arc<Mutex<RequestStatus>>,
}

impl RequestHandle for SteppedRequestHandle {
    fn check(&mut self) -> RequestStatus {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SteppedTransport {
    pub fn new(self_id: u64) -> Self {
        SteppedTransport {
            self_id,
            peers: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Number of sends awaiting a `step`.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Delivers and completes the oldest pending send. Returns `false`
    /// if nothing was pending.
    pub fn step(&self) -> bool {
        let next = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.is_empty() {
                return false;
            }
            pending.remove(0)
        };
        let deliver = self
            .peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&next.dest)
            .cloned();
        if let Some(deliver) = deliver {
            deliver(self.self_id, next.event_type, next.header, next.payload);
            *next.state.lock().unwrap_or_else(|e| e.into_inner()) = RequestStatus::Done;
        } else {
            *next.state.lock().unwrap_or_else(|e| e.into_inner()) =
                RequestStatus::Err(format!("unknown endpoint {}", next.dest));
        }
        true
    }

    /// Steps until nothing is pending.
    pub fn step_all(&self) {
        while self.step() {}
    }
}

impl Transport for SteppedTransport {
    fn send(
        &self,
        dest: EndpointId,
        event_type: u64,
        header: Option<&[u8]>,
        payload: &[u8],
    ) -> Box<dyn RequestHandle> {
        let state = Arc::new(Mutex::new(RequestStatus::InProgress));
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PendingSend {
                dest: dest.0,
                event_type,
                header: header.map(|h| h.to_vec()),
                payload: payload.to_vec(),
                state: state.clone(),
            });
        Box::new(SteppedRequestHandle { state })
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

    #[test_log::test]
    fn send_stays_in_progress_until_stepped() {
        let t = SteppedTransport::new(1);
        let count = Arc::new(AtomicU64::new(0));
        let count2 = count.clone();
        t.register_endpoint(
            EndpointId(2),
            Arc::new(move |_s, _t, _h, _p| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let mut req = t.send(EndpointId(2), 1, None, &[]);
        assert_eq!(req.check(), RequestStatus::InProgress);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(t.step());
        assert_eq!(req.check(), RequestStatus::Done);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!t.step());
    }
}
