//! Fill protocol: local announce -> SP broadcast -> ingest -> aggregated
//! push to local ranks, with the meta-event completion callback that
//! drains revokes queued during the push.

use crate::engine::Engine;
use cache_common::{decode_batch, encode_batch, EngineError, GroupUid, HostUid, PeerInfo, RankEntryWire, SeqNum, SpGid};
use event_channel::{CompletionCtx, EventType, ReceiveCallback, SubEventSpec};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Registers the receive callback for `PEER_CACHE_ENTRIES`, one of the
/// reserved event types the core always installs a handler for.
pub(crate) fn register_handlers(engine: &Engine) {
    let weak = engine.weak();
    let cb: ReceiveCallback = Arc::new(move |source_id, _header, payload| {
        if let Some(engine) = weak.upgrade() {
            handle_peer_cache_entries_recv(&engine, source_id, payload);
        }
    });
    if let Err(e) = engine.event_channel().register(EventType::PEER_CACHE_ENTRIES, cb) {
        warn!("PEER_CACHE_ENTRIES already registered: {e}");
    }
}

/// A local rank announces itself to its SP.
/// `n_local_ranks` is this host's total count of locally-attached ranks
/// for the group, needed by the engine to recognize when every local
/// rank has reported in.
pub fn host_add_local_rank_to_cache(
    engine: &Engine,
    peer: PeerInfo,
    shadow_sps: Vec<SpGid>,
    client_id: u64,
) -> Result<(), EngineError> {
    let group_uid = peer.group_uid;
    let group_size = peer.group_size;
    let n_local_ranks = peer.n_local_ranks;
    let entry = RankEntryWire {
        set: true,
        peer,
        client_id,
        shadow_service_procs: shadow_sps,
    };
    let (events, is_complete) = engine.with_group(group_uid, group_size, |cache| {
        if cache.num_local_entries == 0 {
            cache.n_local_ranks = n_local_ranks;
        }
        let events = cache.ingest_entry(engine.self_sp_gid(), &entry, &engine.hosts_config)?;
        Ok::<_, EngineError>((events, cache.is_complete()))
    })?;
    for id in events {
        engine.event_channel().complete_waiter(id);
    }
    broadcast_to_peer_sps(engine, group_uid, &[entry]);
    if is_complete {
        maybe_push_to_local_ranks(engine, group_uid);
    }
    Ok(())
}

/// SP broadcast: fans local rank entries out to every peer SP.
fn broadcast_to_peer_sps(engine: &Engine, _group_uid: GroupUid, entries: &[RankEntryWire]) {
    let payload = encode_batch(entries);
    for (sp_gid, endpoint) in engine.peer_sp_endpoints() {
        debug!("broadcasting {} rank entries to peer sp {}", entries.len(), sp_gid.0);
        engine
            .event_channel()
            .emit(endpoint, EventType::PEER_CACHE_ENTRIES, &payload, None, CompletionCtx::default());
    }
}

/// Handles a received `PEER_CACHE_ENTRIES` batch. Validates the whole
/// batch before applying any entry: a fatal mismatch partway through a
/// batch must never leave some entries applied and others not.
fn handle_peer_cache_entries_recv(engine: &Engine, source_id: u64, payload: &[u8]) {
    let entries = match decode_batch(payload) {
        Some(e) => e,
        None => {
            error!("PEER_CACHE_ENTRIES payload is not a whole multiple of one entry's size");
            return;
        }
    };
    if entries.is_empty() {
        return;
    }
    let group_size = entries[0].peer.group_size;
    let group_uid = entries[0].peer.group_uid;
    if entries.iter().any(|e| e.peer.group_size != group_size || e.peer.group_uid != group_uid) {
        error!("fatal: mismatched group_uid/group_size within a PEER_CACHE_ENTRIES batch");
        return;
    }

    let source_sp = SpGid(source_id);
    let result = engine.with_group(group_uid, group_size, |cache| {
        let mut waiters = Vec::new();
        for entry in &entries {
            waiters.extend(cache.ingest_entry(source_sp, entry, &engine.hosts_config)?);
        }
        Ok::<_, EngineError>((waiters, cache.is_complete()))
    });
    let (waiters, is_complete) = match result {
        Ok(v) => v,
        Err(e) => {
            error!("ingest failed for group {}: {}", group_uid.0, e);
            return;
        }
    };
    for id in waiters {
        engine.event_channel().complete_waiter(id);
    }
    if is_complete {
        maybe_push_to_local_ranks(engine, group_uid);
    }
}

/// Once the cache is complete, pushes the group to local ranks.
/// "Entirely local" (every rank of the group attached to this one SP)
/// still pushes -- there is no other SP to race against, so the
/// meta-event/revoke-ordering machinery below is harmless overhead, not
/// an incorrect path -- but is logged distinctly as a fast path.
fn maybe_push_to_local_ranks(engine: &Engine, group_uid: GroupUid) {
    let clients = engine.local_rank_endpoints();
    if clients.is_empty() {
        return;
    }
    let entirely_local = engine.with_existing_group(group_uid, |cache| cache.n_local_ranks == cache.group_size);
    if let Ok(true) = entirely_local {
        debug!("group {} is entirely local to this sp", group_uid.0);
    }

    let is_world = engine.with_existing_group(group_uid, |cache| cache.is_world).unwrap_or(false);
    if is_world {
        push_sp_data_to_local_ranks(engine, group_uid, &clients);
    }

    let children: Vec<SubEventSpec> = clients
        .iter()
        .map(|(client_id, endpoint)| {
            let payload = engine
                .with_existing_group(group_uid, |cache| encode_batch(&cache.to_wire_batch(*client_id)))
                .unwrap_or_default();
            SubEventSpec {
                dest: *endpoint,
                event_type: EventType::PEER_CACHE_ENTRIES,
                payload,
            }
        })
        .collect();

    engine.with_existing_group(group_uid, |cache| cache.send_to_host_in_flight = true).ok();

    let mut ctx_bytes = group_uid.0.to_le_bytes().to_vec();
    ctx_bytes.resize(4, 0);
    let ctx = CompletionCtx {
        user_context: Some(ctx_bytes),
        engine_context: None,
    };

    info!("group {} complete, pushing full rank table to {} local ranks", group_uid.0, children.len());
    let status = engine.event_channel().emit_meta(children, Some(completion_cb(engine)), ctx);
    match status {
        event_channel::EmitStatus::Done => {
            // all children finished synchronously: the completion
            // callback already ran and cleared send_to_host_in_flight.
        }
        event_channel::EmitStatus::InProgress => {}
        event_channel::EmitStatus::TransportError(e) => {
            error!("push to local ranks for group {} failed: {}", group_uid.0, e);
            engine.with_existing_group(group_uid, |cache| cache.send_to_host_in_flight = false).ok();
        }
    }
}

/// Extension point for world-group SP-data aggregation: a real
/// deployment would push aggregated per-SP data ahead of the rank table
/// here. This workspace sends an empty `SP_DATA_TO_HOST` notification
/// and leaves the payload shape undefined.
fn push_sp_data_to_local_ranks(engine: &Engine, group_uid: GroupUid, clients: &[(u64, transport::EndpointId)]) {
    debug!("group {} is the world group, sending sp-data marker first", group_uid.0);
    for (_, endpoint) in clients {
        engine
            .event_channel()
            .emit(*endpoint, EventType::SP_DATA_TO_HOST, &[], None, CompletionCtx::default());
    }
}

/// Marks the cache as sent, drains revokes that queued during the send,
/// and kicks off the revoke-to-ranks step if the drain completed a
/// pending global revoke. Also eagerly populates the topology lookup
/// tables, since downstream queries must never race a half-built index.
fn completion_cb(engine: &Engine) -> event_channel::CompletionCallback {
    let weak = engine.weak();
    Arc::new(move |ctx: &CompletionCtx| {
        let Some(engine) = weak.upgrade() else {
            return;
        };
        let engine = engine.as_ref();
        let group_uid = match &ctx.user_context {
            Some(bytes) if bytes.len() >= 4 => GroupUid(u32::from_le_bytes(bytes[0..4].try_into().unwrap())),
            _ => {
                error!("cache-to-host completion fired without a group_uid context");
                return;
            }
        };
        let drained = engine.with_existing_group(group_uid, |cache| {
            cache.persistent.sent_to_host = cache.persistent.num.0;
            cache.send_to_host_in_flight = false;
            cache.topology.populate_group_cache_lookup_table();
            cache.drain_pending_revokes()
        });
        match drained {
            Ok(n) if n > 0 => {
                debug!("drained {} pending revokes for group {} after send completed", n, group_uid.0);
                let ready = engine.with_existing_group(group_uid, |cache| cache.ready_for_revoke_to_ranks()).unwrap_or(false);
                if ready {
                    crate::revoke::revoke_to_ranks(engine, group_uid);
                }
            }
            Ok(_) => {}
            Err(e) => error!("cache-to-host completion for unknown group {}: {}", group_uid.0, e),
        }
    })
}

/// Builds a [`PeerInfo`] for a local rank announcement -- a small
/// convenience used by tests and by whatever wires a real rank client's
/// bootstrap message into this crate. Not part of the wire format
/// itself, just a constructor.
pub fn local_peer_info(
    group_uid: GroupUid,
    group_rank: i64,
    group_size: i64,
    seq_num: SeqNum,
    n_local_ranks: i64,
    local_rank: i64,
    host_uid: HostUid,
) -> PeerInfo {
    PeerInfo {
        group_uid,
        group_rank,
        group_size,
        seq_num,
        n_local_ranks,
        local_rank,
        host_uid,
        addr: Vec::new(),
    }
}
