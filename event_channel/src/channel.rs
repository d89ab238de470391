//! The event channel itself: registration, emission, and the meta-event
//! fan-out/completion machinery.

use crate::event_type::EventType;
use crate::handle::{CompletionCallback, CompletionCtx, EventHandleId, EventHandleSlot};
use cache_common::EngineError;
use pools::Pool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};
use transport::{EndpointId, RequestStatus, Transport};

pub type ReceiveCallback = Arc<dyn Fn(u64, Option<&[u8]>, &[u8]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitStatus {
    Done,
    InProgress,
    TransportError(String),
}

/// A single sub-event to fan out as part of a meta-event.
pub struct SubEventSpec {
    pub dest: EndpointId,
    pub event_type: EventType,
    pub payload: Vec<u8>,
}

struct Inner {
    my_id: u64,
    registry: Mutex<HashMap<u64, ReceiveCallback>>,
    pool: Mutex<Pool<EventHandleSlot>>,
    in_flight: Mutex<Vec<EventHandleId>>,
    transport: Arc<dyn Transport>,
    seq_counter: AtomicU64,
}

pub struct EventChannel {
    inner: Arc<Inner>,
}

impl EventChannel {
    /// Constructs a channel bound to `self_endpoint` on `transport`: every
    /// message the transport delivers to that endpoint is routed to this
    /// channel's registered callbacks.
    pub fn bind(transport: Arc<dyn Transport>, self_endpoint: EndpointId, my_id: u64) -> Arc<Self> {
        let inner = Arc::new(Inner {
            my_id,
            registry: Mutex::new(HashMap::new()),
            pool: Mutex::new(Pool::new("event_handles", 64)),
            in_flight: Mutex::new(Vec::new()),
            transport,
            seq_counter: AtomicU64::new(1),
        });
        let channel = EventChannel { inner };
        let dispatch_inner = channel.inner.clone();
        channel.inner.transport.register_endpoint(
            self_endpoint,
            Arc::new(move |source_id, event_type, header, payload| {
                dispatch(&dispatch_inner, source_id, event_type, header.as_deref(), &payload);
            }),
        );
        Arc::new(channel)
    }

    pub fn register(&self, ty: EventType, cb: ReceiveCallback) -> Result<(), EngineError> {
        let mut registry = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
        if registry.contains_key(&ty.0) {
            return Err(EngineError::AlreadyRegistered);
        }
        registry.insert(ty.0, cb);
        Ok(())
    }

    pub fn deregister(&self, ty: EventType) {
        self.inner.registry.lock().unwrap_or_else(|e| e.into_inner()).remove(&ty.0);
    }

    /// Emits a single, non-fan-out event.
    pub fn emit(
        &self,
        dest: EndpointId,
        ty: EventType,
        payload: &[u8],
        completion_cb: Option<CompletionCallback>,
        completion_ctx: CompletionCtx,
    ) -> EmitStatus {
        let idx = {
            let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
            let idx = pool.acquire();
            let slot = pool.get_mut(idx);
            slot.seq_num = self.inner.seq_counter.fetch_add(1, Ordering::Relaxed);
            slot.event_type = ty.0;
            slot.is_subevent = false;
            slot.parent = None;
            slot.sub_events.clear();
            slot.completion_cb = completion_cb;
            slot.completion_ctx = completion_ctx;
            slot.payload = payload.to_vec();
            idx
        };
        let mut request = self.inner.transport.send(dest, ty.0, None, payload);
        match request.check() {
            RequestStatus::Done => {
                self.complete_event(idx);
                EmitStatus::Done
            }
            RequestStatus::InProgress => {
                {
                    let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
                    pool.get_mut(idx).request = Some(request);
                }
                self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner()).push(idx);
                EmitStatus::InProgress
            }
            RequestStatus::Err(e) => {
                let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
                pool.release(idx);
                EmitStatus::TransportError(e)
            }
        }
    }

    /// Emits a meta-event: one sub-event per entry in `children`, with
    /// `completion_cb` invoked exactly once, when every sub-event has
    /// completed. If every child finishes
    /// synchronously, the meta-event completes before this call returns
    /// and its handle is already back in the pool.
    pub fn emit_meta(
        &self,
        children: Vec<SubEventSpec>,
        completion_cb: Option<CompletionCallback>,
        completion_ctx: CompletionCtx,
    ) -> EmitStatus {
        let parent_idx = {
            let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
            let idx = pool.acquire();
            let slot = pool.get_mut(idx);
            slot.seq_num = self.inner.seq_counter.fetch_add(1, Ordering::Relaxed);
            slot.event_type = EventType::META_EVENT.0;
            slot.is_subevent = false;
            slot.parent = None;
            slot.sub_events.clear();
            slot.completion_cb = completion_cb;
            slot.completion_ctx = completion_ctx;
            idx
        };

        let mut first_error = None;
        for child in children {
            let child_idx = {
                let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
                let idx = pool.acquire();
                let slot = pool.get_mut(idx);
                slot.seq_num = self.inner.seq_counter.fetch_add(1, Ordering::Relaxed);
                slot.event_type = child.event_type.0;
                slot.is_subevent = true;
                slot.parent = Some(parent_idx);
                slot.sub_events.clear();
                slot.completion_cb = None;
                slot.payload = child.payload.clone();
                idx
            };
            let mut request =
                self.inner
                    .transport
                    .send(child.dest, child.event_type.0, None, &child.payload);
            match request.check() {
                RequestStatus::Done => {
                    // finished before it was ever added to the parent's list;
                    // equivalent to an immediate decrement of the latch.
                    let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
                    pool.release(child_idx);
                }
                RequestStatus::InProgress => {
                    {
                        let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
                        pool.get_mut(child_idx).request = Some(request);
                        pool.get_mut(parent_idx).sub_events.push(child_idx);
                    }
                    self.inner
                        .in_flight
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(child_idx);
                }
                RequestStatus::Err(e) => {
                    warn!("meta-event sub-event failed to emit: {}", e);
                    first_error.get_or_insert(e);
                    let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
                    pool.release(child_idx);
                }
            }
        }

        let empty_at_queue_time = {
            let pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
            pool.get(parent_idx).sub_events.is_empty()
        };
        if empty_at_queue_time {
            debug!("meta-event completed synchronously, all sub-events finished at queue time");
            self.invoke_completion(parent_idx);
            match first_error {
                Some(e) => EmitStatus::TransportError(e),
                None => EmitStatus::Done,
            }
        } else {
            match first_error {
                Some(e) => EmitStatus::TransportError(e),
                None => EmitStatus::InProgress,
            }
        }
    }

    /// Drives completion of every in-flight event whose transport request
    /// has finished. Call this from the progress loop.
    pub fn progress(&self) {
        let candidates: Vec<EventHandleId> =
            self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let mut finished = Vec::new();
        for idx in candidates {
            let status = {
                let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
                let slot = pool.get_mut(idx);
                slot.request.as_mut().map(|r| r.check())
            };
            match status {
                Some(RequestStatus::InProgress) | None => {}
                Some(RequestStatus::Done) => {
                    {
                        let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
                        pool.get_mut(idx).request = None;
                    }
                    finished.push(idx);
                }
                Some(RequestStatus::Err(e)) => {
                    error!("in-flight event {:?} failed: {}", idx, e);
                    {
                        let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
                        pool.get_mut(idx).request = None;
                    }
                    finished.push(idx);
                }
            }
        }
        // Remove only the entries just finished: a completion callback
        // invoked below (e.g. the cache-to-host meta-event's callback
        // draining queued revokes and emitting GROUP_REVOKE_TO_RANK) can
        // reentrantly push a freshly emitted event onto `in_flight`
        // before this pass returns. Overwriting the whole vector here
        // would clobber that entry -- its request would never be polled
        // again and its pool slot would never be released.
        if !finished.is_empty() {
            let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.retain(|id| !finished.contains(id));
        }
        for idx in finished {
            self.complete_event(idx);
        }
    }

    /// Completes an event that isn't tracked by the transport at all --
    /// used only by the fallback cache-entry-request path
    /// to wake a rank entry's waiters once the entry they wanted finally
    /// arrives. Ordinary emitted events complete via [`Self::progress`].
    pub fn complete_waiter(&self, idx: EventHandleId) {
        self.complete_event(idx);
    }

    /// Handles a just-finished event: if it's a sub-event, removes it
    /// from its parent's list and completes the parent once that list is
    /// empty; otherwise invokes its own completion callback directly.
    fn complete_event(&self, idx: EventHandleId) {
        let parent = {
            let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
            pool.get(idx).parent
        };
        match parent {
            Some(parent_idx) => {
                let parent_empty = {
                    let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
                    pool.release(idx);
                    let parent_slot = pool.get_mut(parent_idx);
                    parent_slot.sub_events.retain(|&c| c != idx);
                    parent_slot.sub_events.is_empty()
                };
                if parent_empty {
                    self.invoke_completion(parent_idx);
                }
            }
            None => self.invoke_completion(idx),
        }
    }

    fn invoke_completion(&self, idx: EventHandleId) {
        let (cb, ctx) = {
            let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
            let slot = pool.get_mut(idx);
            let cb = slot.completion_cb.take();
            let ctx = slot.completion_ctx.clone();
            pool.release(idx);
            (cb, ctx)
        };
        if let Some(cb) = cb {
            cb(&ctx);
        }
    }

    pub fn my_id(&self) -> u64 {
        self.inner.my_id
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn dispatch(inner: &Arc<Inner>, source_id: u64, event_type: u64, header: Option<&[u8]>, payload: &[u8]) {
    let cb = inner
        .registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&event_type)
        .cloned();
    match cb {
        Some(cb) => cb(source_id, header, payload),
        None => warn!("no receive callback registered for event type {}", event_type),
    }
}
