//! Protocol-engine-level integration scenarios: two SPs, one local rank
//! each, driven end to end through [`protocol::Engine`] rather than
//! poking a single `GroupCache` directly.

use cache_common::{decode_batch, GroupUid, HostUid, RankEntryWire, SeqNum, SpGid};
use protocol::engine::BootstrapConfig;
use protocol::{host_add_local_rank_to_cache, host_request_revoke, local_peer_info, Engine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use topology::HostsConfig;
use transport::{EndpointId, InProcessTransport, SteppedTransport, Transport};

fn hosts_config() -> HostsConfig {
    HostsConfig::new(vec![HostUid(0), HostUid(1)])
}

/// Registers a client endpoint on `transport` that records every
/// `PEER_CACHE_ENTRIES` batch it receives, for assertions.
fn record_pushes(transport: &InProcessTransport, endpoint: EndpointId) -> Arc<Mutex<Vec<Vec<RankEntryWire>>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = received.clone();
    transport.register_endpoint(
        endpoint,
        Arc::new(move |_src, event_type, _hdr, payload| {
            if event_type == event_channel::EventType::PEER_CACHE_ENTRIES.0 {
                if let Some(batch) = decode_batch(&payload) {
                    received2.lock().unwrap().push(batch);
                }
            }
        }),
    );
    received
}

fn count_revoke_notifications(transport: &InProcessTransport, endpoint: EndpointId) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let count2 = count.clone();
    transport.register_endpoint(
        endpoint,
        Arc::new(move |_src, event_type, _hdr, _payload| {
            if event_type == event_channel::EventType::GROUP_REVOKE_TO_RANK.0 {
                count2.fetch_add(1, Ordering::SeqCst);
            }
        }),
    );
    count
}

/// Two SPs, one local rank apiece. Announcing both ranks completes both
/// caches independently (each SP learns of the other's rank via the
/// `PEER_CACHE_ENTRIES` broadcast) and each pushes the full, two-entry
/// rank table down to its own local rank client.
#[test_log::test]
fn two_sp_fill_completes_and_pushes_to_both_local_ranks() {
    let transport = Arc::new(InProcessTransport::new(0));
    let group_uid = GroupUid(1);

    let engine_a = Engine::new(
        BootstrapConfig {
            self_host_uid: HostUid(0),
            self_sp_gid: SpGid(0),
            hosts_config: hosts_config(),
            world_group_uid: GroupUid(999),
        },
        transport.clone(),
        EndpointId(10),
    );
    let engine_b = Engine::new(
        BootstrapConfig {
            self_host_uid: HostUid(1),
            self_sp_gid: SpGid(1),
            hosts_config: hosts_config(),
            world_group_uid: GroupUid(999),
        },
        transport.clone(),
        EndpointId(20),
    );
    engine_a.register_peer_sp_endpoint(SpGid(1), EndpointId(20));
    engine_b.register_peer_sp_endpoint(SpGid(0), EndpointId(10));

    let client_a_pushes = record_pushes(&transport, EndpointId(11));
    let client_b_pushes = record_pushes(&transport, EndpointId(21));
    engine_a.register_local_rank_client(100, EndpointId(11));
    engine_b.register_local_rank_client(200, EndpointId(21));

    host_add_local_rank_to_cache(
        &engine_a,
        local_peer_info(group_uid, 0, 2, SeqNum(1), 1, 0, HostUid(0)),
        vec![SpGid(0)],
        100,
    )
    .unwrap();
    host_add_local_rank_to_cache(
        &engine_b,
        local_peer_info(group_uid, 1, 2, SeqNum(1), 1, 1, HostUid(1)),
        vec![SpGid(1)],
        200,
    )
    .unwrap();

    assert!(engine_a.is_group_complete(group_uid).unwrap());
    assert!(engine_b.is_group_complete(group_uid).unwrap());

    let a_batches = client_a_pushes.lock().unwrap();
    assert_eq!(a_batches.len(), 1, "exactly one push to the local rank client");
    assert_eq!(a_batches[0].len(), 2, "the full two-rank table, not just the local entry");
    assert!(a_batches[0].iter().all(|e| e.set));

    let b_batches = client_b_pushes.lock().unwrap();
    assert_eq!(b_batches.len(), 1);
    assert_eq!(b_batches[0].len(), 2);

    assert!(engine_a.on_same_host(group_uid, 0, 1).unwrap() == false);
    assert_eq!(engine_a.group_rank_host(group_uid, 1).unwrap(), HostUid(1));
}

/// After the group completes and both local ranks ask to revoke, the
/// aggregated global revoke count reaches `group_size` and each SP
/// notifies its own local rank with `GROUP_REVOKE_TO_RANK`, then resets.
#[test_log::test]
fn revoke_after_fill_notifies_local_ranks_and_resets() {
    let transport = Arc::new(InProcessTransport::new(0));
    let group_uid = GroupUid(1);

    let engine_a = Engine::new(
        BootstrapConfig {
            self_host_uid: HostUid(0),
            self_sp_gid: SpGid(0),
            hosts_config: hosts_config(),
            world_group_uid: GroupUid(999),
        },
        transport.clone(),
        EndpointId(10),
    );
    let engine_b = Engine::new(
        BootstrapConfig {
            self_host_uid: HostUid(1),
            self_sp_gid: SpGid(1),
            hosts_config: hosts_config(),
            world_group_uid: GroupUid(999),
        },
        transport.clone(),
        EndpointId(20),
    );
    engine_a.register_peer_sp_endpoint(SpGid(1), EndpointId(20));
    engine_b.register_peer_sp_endpoint(SpGid(0), EndpointId(10));

    let revokes_a = count_revoke_notifications(&transport, EndpointId(11));
    let revokes_b = count_revoke_notifications(&transport, EndpointId(21));
    engine_a.register_local_rank_client(100, EndpointId(11));
    engine_b.register_local_rank_client(200, EndpointId(21));

    host_add_local_rank_to_cache(
        &engine_a,
        local_peer_info(group_uid, 0, 2, SeqNum(1), 1, 0, HostUid(0)),
        vec![SpGid(0)],
        100,
    )
    .unwrap();
    host_add_local_rank_to_cache(
        &engine_b,
        local_peer_info(group_uid, 1, 2, SeqNum(1), 1, 1, HostUid(1)),
        vec![SpGid(1)],
        200,
    )
    .unwrap();
    assert!(engine_a.is_group_complete(group_uid).unwrap());

    host_request_revoke(&engine_a, group_uid).unwrap();
    host_request_revoke(&engine_b, group_uid).unwrap();

    assert_eq!(revokes_a.load(Ordering::SeqCst), 1);
    assert_eq!(revokes_b.load(Ordering::SeqCst), 1);
    // cache is lazily recreated by the next ingest; after a hard reset
    // it reports incomplete until re-filled.
    assert!(!engine_a.is_group_complete(group_uid).unwrap());
}

/// A revoke acknowledgement that arrives while the cache-to-host push is
/// still in flight must be queued, not applied, and must drain only once
/// the meta-event's completion callback runs -- at which point the
/// now-complete global revoke count immediately drives the
/// revoke-to-ranks step.
#[test_log::test]
fn s4_revoke_during_send_is_deferred_to_completion_callback() {
    let transport = Arc::new(SteppedTransport::new(0));
    let group_uid = GroupUid(1);

    let engine_a = Engine::new(
        BootstrapConfig {
            self_host_uid: HostUid(0),
            self_sp_gid: SpGid(0),
            hosts_config: hosts_config(),
            world_group_uid: GroupUid(999),
        },
        transport.clone(),
        EndpointId(10),
    );
    // SteppedTransport defers every send, which is what holds the cache-
    // to-host push in `InProgress` long enough to race the revoke.
    let revoke_notifications = count_revoke_notifications(&transport, EndpointId(11));
    engine_a.register_local_rank_client(100, EndpointId(11));

    // Single-rank, single-SP group: the cache completes on the very
    // first ingest, immediately starting the push to the local rank.
    host_add_local_rank_to_cache(
        &engine_a,
        local_peer_info(group_uid, 0, 1, SeqNum(1), 1, 0, HostUid(0)),
        vec![SpGid(0)],
        100,
    )
    .unwrap();
    assert_eq!(transport.pending_count(), 1, "the push to the local rank is in flight");

    // The local rank asks to revoke while that push is still in flight.
    // `record_global_revoke` inside `host_request_revoke` must queue
    // this, not apply it immediately.
    host_request_revoke(&engine_a, group_uid).unwrap();
    assert_eq!(
        revoke_notifications.load(Ordering::SeqCst),
        0,
        "revoke-to-ranks must not fire before the in-flight push completes"
    );

    // Completing the push invokes the meta-event's completion callback,
    // which drains the queued revoke -- completing the global revoke
    // count for this one-rank group -- and that drain itself triggers
    // the revoke-to-ranks step and the hard reset.
    transport.step_all();
    engine_a.event_channel().progress();

    // progress()'s completion callback runs revoke_to_ranks, which emits
    // GROUP_REVOKE_TO_RANK through the same SteppedTransport -- and that
    // send is itself deferred until stepped, so it must be stepped again
    // before the notification actually reaches the endpoint callback.
    transport.step_all();

    assert_eq!(revoke_notifications.load(Ordering::SeqCst), 1);
    assert_eq!(transport.pending_count(), 0, "no sends left undelivered");
    assert!(!engine_a.is_group_complete(group_uid).unwrap(), "hard reset leaves the cache incomplete");
}
