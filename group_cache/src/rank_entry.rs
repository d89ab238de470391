//! A single rank's slot in a group cache.

use cache_common::{GroupUid, PeerInfo, RankEntryWire, SpGid};
use event_channel::EventHandleId;

#[derive(Debug, Clone, Default)]
pub struct RankEntry {
    pub set: bool,
    pub peer: Option<PeerInfo>,
    pub shadow_sp_ids: Vec<SpGid>,
    /// Events waiting on this rank becoming `set`, used only by the
    /// fallback cache-entry-request path; empty on the fast path this
    /// crate otherwise exercises.
    pub events_list: Vec<EventHandleId>,
}

impl RankEntry {
    /// Clears the slot back to its pre-fill state, as part of a group
    /// revoke's hard reset. Callers must drain `events_list` themselves
    /// first -- this only clears it.
    pub fn reset(&mut self) {
        self.set = false;
        self.peer = None;
        self.shadow_sp_ids.clear();
        self.events_list.clear();
    }

    /// Renders this slot back onto the wire, for the aggregated push of
    /// the full rank table to local ranks. An unset slot wire-encodes as
    /// `set=false` with a
    /// placeholder `peer`; receivers must not read `peer` fields from an
    /// entry whose `set` bit is clear.
    pub fn to_wire(&self, group_uid: GroupUid, group_size: i64, client_id: u64) -> RankEntryWire {
        match &self.peer {
            Some(peer) => RankEntryWire {
                set: self.set,
                peer: peer.clone(),
                client_id,
                shadow_service_procs: self.shadow_sp_ids.clone(),
            },
            None => RankEntryWire {
                set: false,
                peer: PeerInfo {
                    group_uid,
                    group_rank: -1,
                    group_size,
                    seq_num: cache_common::SeqNum::UNSET,
                    n_local_ranks: 0,
                    local_rank: 0,
                    host_uid: cache_common::HostUid::default(),
                    addr: Vec::new(),
                },
                client_id,
                shadow_service_procs: Vec::new(),
            },
        }
    }
}
