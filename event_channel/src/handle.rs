//! The event handle: a pooled slot tracking one in-flight transport
//! request and, for meta-events, its still-pending children.

use pools::PoolIndex;
use std::sync::Arc;
use transport::RequestHandle;

pub type EventHandleId = PoolIndex;

/// Context passed to a user-installed completion callback:
/// `(user_context, engine_context)`. Anything else the callback needs is
/// implicit -- it's a closure already bound to whatever context it needs
/// when it's installed.
#[derive(Debug, Clone, Default)]
pub struct CompletionCtx {
    pub user_context: Option<Vec<u8>>,
    pub engine_context: Option<Vec<u8>>,
}

pub type CompletionCallback = Arc<dyn Fn(&CompletionCtx) + Send + Sync>;

/// One slot in the event handle pool. Owned by whichever list currently
/// holds it -- the free pool, a parent's `sub_events`, or the in-flight
/// set polled by `EventChannel::progress` -- never more than one at a
/// time.
#[derive(Default)]
pub struct EventHandleSlot {
    pub seq_num: u64,
    pub event_type: u64,
    pub is_subevent: bool,
    pub parent: Option<EventHandleId>,
    pub sub_events: Vec<EventHandleId>,
    pub completion_cb: Option<CompletionCallback>,
    pub completion_ctx: CompletionCtx,
    pub request: Option<Box<dyn RequestHandle>>,
    pub payload: Vec<u8>,
}

impl EventHandleSlot {
    /// An event is completed iff its transport request is finished and,
    /// if it's a meta-event, its sub-event list is empty.
    pub fn is_completed(&self) -> bool {
        let transport_done = match &self.request {
            Some(_) => false, // presence of a live request means still in flight
            None => true,
        };
        transport_done && self.sub_events.is_empty()
    }
}
