//! Per-group SP and host records, pool-allocated.
//!
//! `ranks_bitset`/`sps_bitset` here are indexed by a dense slot assigned at
//! first-sight, not by the raw global ID: `SpGid` and `HostUid` are 64-bit
//! and fleet-wide, so indexing a `group_size`-sized bitset directly by
//! either (as the source does for `sps_bitset`) can run off the end for a
//! large fleet -- see the open question this resolves in the design
//! ledger. Dense slots are always bounded by the group's own membership
//! counts, which can never exceed `group_size`.

use crate::bitset::Bitset;
use cache_common::{GroupUid, HostUid, SpGid};

/// An SP's record within one group's topology.
#[derive(Debug, Clone, Default)]
pub struct SpRecord {
    pub gid: SpGid,
    pub group_uid: GroupUid,
    pub host_uid: HostUid,
    /// Group-local ID, assigned by `populate_group_cache_lookup_table`
    /// from global-ID sort order.
    pub lid: usize,
    pub n_ranks: u32,
    pub ranks_bitset: Bitset,
    /// Dense array of `group_rank` values behind this SP, ascending.
    pub ranks: Vec<i64>,
}

impl SpRecord {
    pub fn new(gid: SpGid, group_uid: GroupUid, host_uid: HostUid, group_size: usize) -> Self {
        SpRecord {
            gid,
            group_uid,
            host_uid,
            lid: 0,
            n_ranks: 0,
            ranks_bitset: Bitset::new(group_size),
            ranks: Vec::new(),
        }
    }

    /// Marks `group_rank` as serviced by this SP. Idempotent.
    pub fn mark_rank(&mut self, group_rank: i64) {
        if !self.ranks_bitset.test(group_rank as usize) {
            self.ranks_bitset.set(group_rank as usize);
            self.n_ranks += 1;
        }
    }

    /// Rebuilds `ranks` from `ranks_bitset` in ascending order. Idempotent.
    pub fn rebuild_dense_ranks(&mut self) {
        self.ranks = self.ranks_bitset.iter_set().map(|b| b as i64).collect();
    }
}

/// A host's record within one group's topology.
#[derive(Debug, Clone, Default)]
pub struct HostRecord {
    pub uid: HostUid,
    pub config_idx: usize,
    pub num_ranks: u32,
    pub num_sps: u32,
    /// Indexed by each SP's per-host discovery slot, not its global ID.
    pub sps_bitset: Bitset,
    pub ranks_bitset: Bitset,
    /// Dense array of SP global IDs attached to this host, ascending by
    /// global ID (populated by the lookup-table pass, not by discovery
    /// order).
    pub sps: Vec<SpGid>,
}

impl HostRecord {
    pub fn new(uid: HostUid, config_idx: usize, group_size: usize) -> Self {
        HostRecord {
            uid,
            config_idx,
            num_ranks: 0,
            num_sps: 0,
            sps_bitset: Bitset::new(group_size),
            ranks_bitset: Bitset::new(group_size),
            sps: Vec::new(),
        }
    }

    pub fn mark_rank(&mut self, group_rank: i64) {
        if !self.ranks_bitset.test(group_rank as usize) {
            self.ranks_bitset.set(group_rank as usize);
            self.num_ranks += 1;
        }
    }

    /// Marks that SP occupying per-host discovery slot `sp_slot` services
    /// this host. Returns whether this was a first sight (0->1 transition).
    pub fn mark_sp(&mut self, sp_slot: usize) -> bool {
        if self.sps_bitset.test(sp_slot) {
            false
        } else {
            self.sps_bitset.set(sp_slot);
            self.num_sps += 1;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn sp_record_dedups_rank_marks() {
        let mut sp = SpRecord::new(SpGid(1), GroupUid(0), HostUid(1), 64);
        sp.mark_rank(3);
        sp.mark_rank(3);
        sp.mark_rank(5);
        assert_eq!(sp.n_ranks, 2);
        sp.rebuild_dense_ranks();
        assert_eq!(sp.ranks, vec![3, 5]);
    }

    #[test_log::test]
    fn host_record_tracks_sp_transition() {
        let mut host = HostRecord::new(HostUid(9), 0, 64);
        assert!(host.mark_sp(0));
        assert!(!host.mark_sp(0));
        assert_eq!(host.num_sps, 1);
    }
}
