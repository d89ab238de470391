//! The event channel: typed registration, emission with completion
//! callbacks, and meta-events that complete when every sub-event has.

pub mod channel;
pub mod event_type;
pub mod handle;

pub use channel::{EmitStatus, EventChannel, ReceiveCallback, SubEventSpec};
pub use event_type::{EventType, USER_RANGE_START};
pub use handle::{CompletionCallback, CompletionCtx, EventHandleId, EventHandleSlot};

#[cfg(test)]
mod tests {
    use super::*;
    use cache_common::EngineError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use transport::{EndpointId, InProcessTransport};

    fn wire_loopback(ids: (u64, u64)) -> (Arc<EventChannel>, Arc<EventChannel>) {
        let transport = Arc::new(InProcessTransport::new(0));
        let a = EventChannel::bind(transport.clone(), EndpointId(ids.0), ids.0);
        let b = EventChannel::bind(transport, EndpointId(ids.1), ids.1);
        (a, b)
    }

    #[test_log::test]
    fn registering_same_type_twice_fails() {
        let (a, _b) = wire_loopback((1, 2));
        let cb: ReceiveCallback = Arc::new(|_src, _ty, _payload| {});
        assert!(a.register(EventType::PEER_CACHE_ENTRIES, cb.clone()).is_ok());
        assert!(matches!(
            a.register(EventType::PEER_CACHE_ENTRIES, cb),
            Err(EngineError::AlreadyRegistered)
        ));
    }

    #[test_log::test]
    fn zero_length_payload_is_delivered() {
        let (a, b) = wire_loopback((1, 2));
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered2 = delivered.clone();
        b.register(
            EventType::TERM,
            Arc::new(move |_src, header, payload| {
                assert!(header.is_none());
                assert!(payload.is_empty());
                delivered2.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        let status = a.emit(EndpointId(2), EventType::TERM, &[], None, CompletionCtx::default());
        assert_eq!(status, EmitStatus::Done);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test_log::test]
    fn emit_invokes_completion_on_synchronous_done() {
        let (a, _b) = wire_loopback((1, 2));
        // endpoint 2 has no channel registered on this transport instance,
        // so register a raw endpoint that just drops the message.
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let status = a.emit(
            EndpointId(1), // loop back to self, which InProcessTransport knows about
            EventType::TERM,
            b"hello",
            Some(Arc::new(move |_ctx: &CompletionCtx| {
                fired2.store(true, Ordering::SeqCst);
            })),
            CompletionCtx::default(),
        );
        assert_eq!(status, EmitStatus::Done);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test_log::test]
    fn meta_event_completes_synchronously_when_all_children_are_immediate() {
        let (a, b) = wire_loopback((1, 2));
        b.register(EventType::SP_DATA_TO_HOST, Arc::new(|_src, _ty, _p| {})).unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let status = a.emit_meta(
            vec![
                SubEventSpec {
                    dest: EndpointId(2),
                    event_type: EventType::SP_DATA_TO_HOST,
                    payload: vec![1, 2, 3],
                },
                SubEventSpec {
                    dest: EndpointId(2),
                    event_type: EventType::SP_DATA_TO_HOST,
                    payload: vec![4, 5, 6],
                },
            ],
            Some(Arc::new(move |_ctx: &CompletionCtx| {
                fired2.store(true, Ordering::SeqCst);
            })),
            CompletionCtx::default(),
        );
        assert_eq!(status, EmitStatus::Done);
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(a.in_flight_count(), 0);
    }

    #[test_log::test]
    fn meta_event_completion_is_deferred_until_stepped() {
        use transport::SteppedTransport;

        let transport = Arc::new(SteppedTransport::new(0));
        let a = EventChannel::bind(transport.clone(), EndpointId(1), 1);
        transport.register_endpoint(EndpointId(2), Arc::new(|_s, _t, _h, _p| {}));

        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let status = a.emit_meta(
            vec![
                SubEventSpec {
                    dest: EndpointId(2),
                    event_type: EventType::SP_DATA_TO_HOST,
                    payload: vec![],
                },
                SubEventSpec {
                    dest: EndpointId(2),
                    event_type: EventType::SP_DATA_TO_HOST,
                    payload: vec![],
                },
            ],
            Some(Arc::new(move |_ctx: &CompletionCtx| {
                fired2.store(true, Ordering::SeqCst);
            })),
            CompletionCtx::default(),
        );
        assert_eq!(status, EmitStatus::InProgress);
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(transport.pending_count(), 2);

        transport.step_all();
        a.progress();
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(a.in_flight_count(), 0);
    }
}
