//! The group cache entity: ingest algorithm and revoke hard reset.

use crate::rank_entry::RankEntry;
use cache_common::{EngineError, GroupUid, HostUid, RankEntryWire, SeqNum, SpGid};
use event_channel::EventHandleId;
use std::collections::VecDeque;
use topology::{HostsConfig, TopologyIndex};
use tracing::debug;

/// Pool-allocated descriptor for an outstanding fallback cache-entry
/// request, used only by the `fallback_cache_entry_request` feature's
/// stub path.
#[cfg(feature = "fallback_cache_entry_request")]
#[derive(Default)]
pub struct RankEntryRequestDescriptor {
    pub group_rank: i64,
    pub waiting_event: Option<EventHandleId>,
}

#[derive(Debug, Clone, Default)]
pub struct Persistent {
    pub num: SeqNum,
    pub sent_to_host: u64,
    pub revoke_sent_to_host: bool,
    pub revoke_send_to_host_posted: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Revokes {
    pub local: u32,
    pub global: u32,
}

/// A revoke acknowledgement queued while a cache-to-host send is in
/// flight, preserving the ordering guarantee that a revoke never
/// overtakes an in-flight push.
#[derive(Debug, Clone, Copy)]
pub struct PendingRevoke {
    pub from_sp: SpGid,
}

pub struct GroupCache {
    pub group_uid: GroupUid,
    pub group_size: i64,
    pub num_local_entries: i64,
    pub n_local_ranks: i64,
    pub n_local_ranks_populated: i64,
    pub persistent: Persistent,
    pub revokes: Revokes,
    pub ranks: Vec<RankEntry>,
    pub topology: TopologyIndex,
    /// The world group aggregates SP-side data before pushing to local
    /// ranks, unlike an ordinary group's direct push.
    pub is_world: bool,
    /// Set while a cache-to-host meta-event is in flight; gates whether
    /// incoming revokes are applied immediately or queued.
    pub send_to_host_in_flight: bool,
    pending_entries: VecDeque<(SpGid, RankEntryWire)>,
    pending_revokes: VecDeque<PendingRevoke>,
    #[cfg(feature = "fallback_cache_entry_request")]
    pending_cache_entry_requests: pools::Pool<RankEntryRequestDescriptor>,
}

impl GroupCache {
    pub fn new(group_uid: GroupUid, group_size: i64, is_world: bool) -> Self {
        GroupCache {
            group_uid,
            group_size,
            num_local_entries: 0,
            n_local_ranks: 0,
            n_local_ranks_populated: 0,
            persistent: Persistent::default(),
            revokes: Revokes::default(),
            ranks: vec![RankEntry::default(); group_size.max(0) as usize],
            topology: TopologyIndex::new(group_uid, group_size),
            is_world,
            send_to_host_in_flight: false,
            pending_entries: VecDeque::new(),
            pending_revokes: VecDeque::new(),
            #[cfg(feature = "fallback_cache_entry_request")]
            pending_cache_entry_requests: pools::Pool::new("rank_entry_requests", 8),
        }
    }

    /// A group is complete iff it has no outstanding global revokes and
    /// every local rank entry has been filled.
    pub fn is_complete(&self) -> bool {
        self.revokes.global == 0 && self.num_local_entries == self.group_size
    }

    /// Ingests one decoded rank entry from a received batch. Returns
    /// events that were waiting on this rank, for the caller (who owns
    /// the event channel) to complete.
    pub fn ingest_entry(
        &mut self,
        _source_sp: SpGid,
        entry: &RankEntryWire,
        hosts_config: &HostsConfig,
    ) -> Result<Vec<EventHandleId>, EngineError> {
        let rank = entry.peer.group_rank;
        if rank < 0 || rank >= self.group_size {
            return Err(EngineError::CacheInconsistent(format!(
                "group_rank {} out of range for group_size {}",
                rank, self.group_size
            )));
        }
        if entry.peer.group_size != self.group_size {
            return Err(cache_common::error::report_fatal(EngineError::CacheInconsistent(format!(
                "batch group_size {} != cache group_size {}",
                entry.peer.group_size, self.group_size
            ))));
        }
        if entry.shadow_service_procs.is_empty() {
            return Err(cache_common::error::report_fatal(EngineError::CacheInconsistent(
                "entry carries zero shadow service processors".to_string(),
            )));
        }

        if self.ranks[rank as usize].set {
            debug!("ingest: rank {} already set, idempotent re-delivery discarded", rank);
            return Ok(Vec::new());
        }

        if self.num_local_entries == 0 {
            self.persistent.num = self.persistent.num.next();
            let expected_sent = self.persistent.num.0 - 1;
            if self.persistent.sent_to_host != expected_sent {
                return Err(cache_common::error::report_fatal(EngineError::CacheInconsistent(format!(
                    "new incarnation started with sent_to_host={} (expected {})",
                    self.persistent.sent_to_host, expected_sent
                ))));
            }
        }
        if entry.peer.seq_num.0 != self.persistent.num.0 {
            return Err(cache_common::error::report_fatal(EngineError::SeqNumMismatch {
                expected: self.persistent.num.0,
                got: entry.peer.seq_num.0,
            }));
        }

        for sp_gid in &entry.shadow_service_procs {
            self.topology
                .update_topology_data(rank, *sp_gid, entry.peer.host_uid, hosts_config)?;
        }

        let slot = &mut self.ranks[rank as usize];
        slot.peer = Some(entry.peer.clone());
        slot.set = true;
        slot.shadow_sp_ids.extend(entry.shadow_service_procs.iter().copied());
        self.num_local_entries += 1;

        Ok(std::mem::take(&mut slot.events_list))
    }

    pub fn record_local_revoke(&mut self) {
        self.revokes.local += 1;
    }

    /// A revoke that arrives while the cache-to-host send is in flight is
    /// queued, not applied. Returns whether it was applied immediately.
    pub fn record_global_revoke(&mut self, from_sp: SpGid) -> bool {
        if self.send_to_host_in_flight {
            self.pending_revokes.push_back(PendingRevoke { from_sp });
            false
        } else {
            self.revokes.global += 1;
            true
        }
    }

    /// Drains revokes queued while the send was in flight (called from
    /// the meta-event completion callback). Returns how many were
    /// applied.
    pub fn drain_pending_revokes(&mut self) -> usize {
        let n = self.pending_revokes.len();
        while self.pending_revokes.pop_front().is_some() {
            self.revokes.global += 1;
        }
        n
    }

    pub fn pending_revoke_count(&self) -> usize {
        self.pending_revokes.len()
    }

    pub fn queue_pending_entry(&mut self, from_sp: SpGid, entry: RankEntryWire) {
        self.pending_entries.push_back((from_sp, entry));
    }

    pub fn drain_pending_entries(&mut self) -> Vec<(SpGid, RankEntryWire)> {
        self.pending_entries.drain(..).collect()
    }

    pub fn ready_for_revoke_to_ranks(&self) -> bool {
        self.revokes.global == self.group_size as u32 && self.persistent.sent_to_host == self.persistent.num.0
    }

    /// Hard reset: rank table cleared, topology destroyed, counters
    /// zeroed. `persistent` survives so the next incarnation can assert
    /// against it.
    pub fn hard_reset(&mut self) -> Vec<EventHandleId> {
        let mut revoked_waiters = Vec::new();
        for rank in &mut self.ranks {
            revoked_waiters.extend(rank.events_list.drain(..));
            rank.reset();
        }
        self.topology.reset();
        self.num_local_entries = 0;
        self.revokes = Revokes::default();
        revoked_waiters
    }

    /// Renders the full rank table onto the wire for the aggregated push
    /// to local ranks. `client_id` is stamped onto every
    /// entry as the destination's own client id, matching the wire
    /// field's role as an addressing hint rather than a per-entry origin
    /// tag.
    pub fn to_wire_batch(&self, client_id: u64) -> Vec<RankEntryWire> {
        self.ranks
            .iter()
            .map(|r| r.to_wire(self.group_uid, self.group_size, client_id))
            .collect()
    }

    /// `global_sp_id_by_group`: this process's SP global ID, if it is a
    /// member of the group's topology.
    pub fn global_sp_id_by_group(&mut self, self_sp_gid: SpGid) -> Result<SpGid, EngineError> {
        self.topology.local_sp_id(self_sp_gid)?;
        Ok(self_sp_gid)
    }

    /// `host_idx_by_group`: this process's host's array index.
    pub fn host_idx_by_group(&mut self, self_host_uid: HostUid) -> Result<usize, EngineError> {
        self.topology.host_idx(self_host_uid)
    }

    /// Fast-path-only cache entry lookup: the deployment this core
    /// serves always fully populates the cache before a lookup, so an
    /// unset entry here is an invariant violation, not a recoverable
    /// miss.
    #[cfg(not(feature = "fallback_cache_entry_request"))]
    pub fn get_cache_entry_by_group_rank(&self, group_rank: i64) -> Result<&RankEntry, EngineError> {
        let entry = self
            .ranks
            .get(group_rank as usize)
            .ok_or(EngineError::NotInGroup)?;
        assert!(
            entry.set,
            "cache entry lookup for unset rank {group_rank}: cache must be fully populated before lookups"
        );
        Ok(entry)
    }

    /// Fallback path, preserved only under this feature flag. Not wired
    /// to an actual cache-entry-request broadcast: reaching it in
    /// practice would indicate a deployment this core doesn't support.
    #[cfg(feature = "fallback_cache_entry_request")]
    pub fn get_cache_entry_by_group_rank(
        &mut self,
        group_rank: i64,
        waiting_event: EventHandleId,
    ) -> Result<&RankEntry, EngineError> {
        let entry = self
            .ranks
            .get_mut(group_rank as usize)
            .ok_or(EngineError::NotInGroup)?;
        if !entry.set {
            entry.events_list.push(waiting_event);
            let descriptor_idx = self.pending_cache_entry_requests.acquire();
            *self.pending_cache_entry_requests.get_mut(descriptor_idx) = RankEntryRequestDescriptor {
                group_rank,
                waiting_event: Some(waiting_event),
            };
            unimplemented!(
                "cache-entry-request broadcast for rank {group_rank} is not wired up: this path is unreachable on the deployments this core supports"
            );
        }
        Ok(entry)
    }
}
