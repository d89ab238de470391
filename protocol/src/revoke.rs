//! Revoke protocol: local rank revoke requests aggregate into a per-SP
//! acknowledgement broadcast to every peer SP; once every rank in the
//! group has acknowledged, the SP pushes `GROUP_REVOKE_TO_RANK` to its
//! local ranks and performs the hard reset.

use crate::engine::Engine;
use cache_common::{EngineError, GroupUid, SpGid};
use event_channel::{CompletionCtx, EventType, ReceiveCallback};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) fn register_handlers(engine: &Engine) {
    let weak = engine.weak();
    let cb: ReceiveCallback = Arc::new(move |source_id, _header, payload| {
        if let Some(engine) = weak.upgrade() {
            handle_group_revoke_from_sp_recv(&engine, source_id, payload);
        }
    });
    if let Err(e) = engine.event_channel().register(EventType::GROUP_REVOKE_FROM_SP, cb) {
        warn!("GROUP_REVOKE_FROM_SP already registered: {e}");
    }
}

fn encode_revoke_ack(group_uid: GroupUid, count: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&group_uid.0.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    buf
}

fn decode_revoke_ack(buf: &[u8]) -> Option<(GroupUid, u32)> {
    if buf.len() < 8 {
        return None;
    }
    let group_uid = GroupUid(u32::from_le_bytes(buf[0..4].try_into().ok()?));
    let count = u32::from_le_bytes(buf[4..8].try_into().ok()?);
    Some((group_uid, count))
}

/// A local rank asks its SP to revoke the group. Once every
/// locally-attached rank has asked, this SP
/// broadcasts one acknowledgement per peer SP carrying its local count,
/// and folds its own local acknowledgements into `revokes.global`
/// directly (no wire round-trip needed for an SP's own local ranks).
pub fn host_request_revoke(engine: &Engine, group_uid: GroupUid) -> Result<(), EngineError> {
    let (should_broadcast, n_local_ranks) = engine.with_existing_group(group_uid, |cache| {
        cache.record_local_revoke();
        (cache.revokes.local == cache.n_local_ranks as u32, cache.n_local_ranks)
    })?;
    if !should_broadcast {
        return Ok(());
    }
    debug!("group {} local revoke quorum reached, broadcasting", group_uid.0);
    for _ in 0..n_local_ranks {
        engine.with_existing_group(group_uid, |cache| cache.record_global_revoke(engine.self_sp_gid()))?;
    }
    let payload = encode_revoke_ack(group_uid, n_local_ranks as u32);
    for (sp_gid, endpoint) in engine.peer_sp_endpoints() {
        debug!("sending revoke ack for group {} to peer sp {}", group_uid.0, sp_gid.0);
        engine
            .event_channel()
            .emit(endpoint, EventType::GROUP_REVOKE_FROM_SP, &payload, None, CompletionCtx::default());
    }
    maybe_revoke_to_ranks(engine, group_uid);
    Ok(())
}

fn handle_group_revoke_from_sp_recv(engine: &Engine, source_id: u64, payload: &[u8]) {
    let Some((group_uid, count)) = decode_revoke_ack(payload) else {
        warn!("malformed GROUP_REVOKE_FROM_SP payload from {}", source_id);
        return;
    };
    let source_sp = SpGid(source_id);
    let result = engine.with_existing_group(group_uid, |cache| {
        for _ in 0..count {
            cache.record_global_revoke(source_sp);
        }
    });
    if result.is_err() {
        warn!("revoke ack for unknown group {} from sp {}", group_uid.0, source_id);
        return;
    }
    maybe_revoke_to_ranks(engine, group_uid);
}

fn maybe_revoke_to_ranks(engine: &Engine, group_uid: GroupUid) {
    let ready = engine.with_existing_group(group_uid, |cache| cache.ready_for_revoke_to_ranks()).unwrap_or(false);
    if ready {
        revoke_to_ranks(engine, group_uid);
    }
}

/// Pushes `GROUP_REVOKE_TO_RANK` to every local rank and performs the
/// hard reset. Any event still waiting on a rank entry's `events_list`
/// completes synchronously with `EngineError::Revoked` before the reset
/// is observable.
pub(crate) fn revoke_to_ranks(engine: &Engine, group_uid: GroupUid) {
    let clients = engine.local_rank_endpoints();
    info!("group {} fully revoked, notifying {} local ranks and resetting", group_uid.0, clients.len());
    let payload = group_uid.0.to_le_bytes().to_vec();
    for (_, endpoint) in &clients {
        engine
            .event_channel()
            .emit(*endpoint, EventType::GROUP_REVOKE_TO_RANK, &payload, None, CompletionCtx::default());
    }
    let waiters = engine.with_existing_group(group_uid, |cache| cache.hard_reset());
    if let Ok(waiters) = waiters {
        for id in waiters {
            // queued lookups complete with a "revoked" status. The
            // waiter's own caller is responsible for inspecting
            // `EngineError::Revoked`; the event channel only knows how
            // to wake it.
            engine.event_channel().complete_waiter(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn revoke_ack_round_trips() {
        let encoded = encode_revoke_ack(GroupUid(7), 42);
        let (group_uid, count) = decode_revoke_ack(&encoded).unwrap();
        assert_eq!(group_uid, GroupUid(7));
        assert_eq!(count, 42);
    }

    #[test_log::test]
    fn short_revoke_ack_rejected() {
        assert!(decode_revoke_ack(&[1, 2, 3]).is_none());
    }
}
