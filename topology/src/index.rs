//! The topology indexer and query surface.
//!
//! One `TopologyIndex` per group cache. Ingest calls `update_topology_data`
//! once per `(group_rank, sp_gid, host_uid)` triple learned from a rank
//! entry; queries walk the derived dense arrays built lazily by
//! `populate_group_cache_lookup_table`.

use crate::bitset::Bitset;
use crate::hosts_config::HostsConfig;
use crate::records::{HostRecord, SpRecord};
use cache_common::{EngineError, GroupUid, HostUid, SpGid};
use pools::{Pool, PoolIndex};
use std::collections::HashMap;
use tracing::debug;

pub struct TopologyIndex {
    group_uid: GroupUid,
    group_size: i64,

    sp_pool: Pool<SpRecord>,
    host_pool: Pool<HostRecord>,

    sps_hash: HashMap<SpGid, PoolIndex>,
    hosts_hash: HashMap<HostUid, PoolIndex>,

    /// Group-wide SP membership, indexed by discovery slot (see
    /// `records.rs` for why this isn't indexed by raw `sp_gid`).
    sps_bitset: Bitset,
    /// Indexed by `config_idx`.
    hosts_bitset: Bitset,

    /// sp_gid -> discovery slot, and its inverse, needed to translate a
    /// host's slot-indexed `sps_bitset` back into global IDs at
    /// population time.
    sp_slot: HashMap<SpGid, usize>,
    slot_to_sp_gid: Vec<SpGid>,

    /// Dense, ascending by global SP ID once populated.
    sps_array: Vec<PoolIndex>,
    /// Dense, ascending by `config_idx` once populated.
    hosts_array: Vec<PoolIndex>,
    /// `HostUid` parallel to `hosts_array`, cached for `all_hosts_by_group`.
    hosts_uid_cache: Vec<HostUid>,

    lookup_tables_populated: bool,
}

impl TopologyIndex {
    pub fn new(group_uid: GroupUid, group_size: i64) -> Self {
        TopologyIndex {
            group_uid,
            group_size,
            sp_pool: Pool::new("sp_records", 16),
            host_pool: Pool::new("host_records", 16),
            sps_hash: HashMap::new(),
            hosts_hash: HashMap::new(),
            sps_bitset: Bitset::new(group_size.max(0) as usize),
            hosts_bitset: Bitset::new(0),
            sp_slot: HashMap::new(),
            slot_to_sp_gid: Vec::new(),
            sps_array: Vec::new(),
            hosts_array: Vec::new(),
            hosts_uid_cache: Vec::new(),
            lookup_tables_populated: false,
        }
    }

    pub fn n_sps(&self) -> usize {
        self.sps_hash.len()
    }

    pub fn n_hosts(&self) -> usize {
        self.hosts_hash.len()
    }

    pub fn lookup_tables_populated(&self) -> bool {
        self.lookup_tables_populated
    }

    /// For property test P2: `popcount(sps_bitset) == n_sps`.
    pub fn sps_bitset_count(&self) -> usize {
        self.sps_bitset.count()
    }

    /// Reference to a host record's own `sps_bitset`, for property test
    /// P3: `popcount(host.sps_bitset) == host.num_sps`.
    pub fn host_sps_bitset_count(&self, host_uid: HostUid) -> Result<usize, EngineError> {
        let idx = *self.hosts_hash.get(&host_uid).ok_or(EngineError::NotInGroup)?;
        Ok(self.host_pool.get(idx).sps_bitset.count())
    }

    /// Resets the index back to empty, as part of a group revoke's hard
    /// reset: bitsets destroyed, hashes emptied, pools drained back to
    /// free, `lookup_tables_populated` cleared.
    pub fn reset(&mut self) {
        for idx in self.sps_hash.values() {
            self.sp_pool.release(*idx);
        }
        for idx in self.hosts_hash.values() {
            self.host_pool.release(*idx);
        }
        self.sps_hash.clear();
        self.hosts_hash.clear();
        self.sps_bitset = Bitset::new(self.group_size.max(0) as usize);
        self.hosts_bitset.clear();
        self.sp_slot.clear();
        self.slot_to_sp_gid.clear();
        self.sps_array.clear();
        self.hosts_array.clear();
        self.hosts_uid_cache.clear();
        self.lookup_tables_populated = false;
    }

    /// Incrementally folds one `(group_rank, sp_gid, host_uid)`
    /// observation into the index. Idempotent per `(sp_gid, group_rank)`
    /// and per `(host_uid, group_rank)` pair.
    pub fn update_topology_data(
        &mut self,
        group_rank: i64,
        sp_gid: SpGid,
        host_uid: HostUid,
        hosts_config: &HostsConfig,
    ) -> Result<(), EngineError> {
        let sp_idx = match self.sps_hash.get(&sp_gid) {
            Some(idx) => *idx,
            None => {
                let idx = self.sp_pool.acquire();
                *self.sp_pool.get_mut(idx) =
                    SpRecord::new(sp_gid, self.group_uid, host_uid, self.group_size.max(0) as usize);
                let slot = self.slot_to_sp_gid.len();
                self.slot_to_sp_gid.push(sp_gid);
                self.sp_slot.insert(sp_gid, slot);
                self.sps_bitset.set(slot);
                self.sps_hash.insert(sp_gid, idx);
                debug!("topology: new sp sp_gid={} slot={}", sp_gid.0, slot);
                idx
            }
        };
        self.sp_pool.get_mut(sp_idx).mark_rank(group_rank);
        let sp_slot = self.sp_slot[&sp_gid];

        let host_idx = match self.hosts_hash.get(&host_uid) {
            Some(idx) => *idx,
            None => {
                let config_idx = hosts_config.config_idx_of(host_uid).ok_or_else(|| {
                    EngineError::CacheInconsistent(format!(
                        "host_uid {} absent from hosts_config",
                        host_uid.0
                    ))
                })?;
                let idx = self.host_pool.acquire();
                *self.host_pool.get_mut(idx) =
                    HostRecord::new(host_uid, config_idx, self.group_size.max(0) as usize);
                self.hosts_bitset.set(config_idx);
                self.hosts_hash.insert(host_uid, idx);
                debug!(
                    "topology: new host host_uid={} config_idx={}",
                    host_uid.0, config_idx
                );
                idx
            }
        };
        let host = self.host_pool.get_mut(host_idx);
        host.mark_sp(sp_slot);
        host.mark_rank(group_rank);

        self.lookup_tables_populated = false;
        Ok(())
    }

    /// Builds the derived dense arrays from the discovery-order data.
    /// Idempotent; safe to call eagerly or lazily from a query.
    pub fn populate_group_cache_lookup_table(&mut self) {
        if self.lookup_tables_populated {
            return;
        }
        let mut sp_entries: Vec<(SpGid, PoolIndex)> =
            self.sps_hash.iter().map(|(gid, idx)| (*gid, *idx)).collect();
        sp_entries.sort_by_key(|(gid, _)| *gid);
        self.sps_array = sp_entries.iter().map(|(_, idx)| *idx).collect();
        for (lid, (_, idx)) in sp_entries.iter().enumerate() {
            let sp = self.sp_pool.get_mut(*idx);
            sp.lid = lid;
            sp.rebuild_dense_ranks();
        }

        let mut host_entries: Vec<(usize, HostUid, PoolIndex)> = self
            .hosts_hash
            .iter()
            .map(|(uid, idx)| (self.host_pool.get(*idx).config_idx, *uid, *idx))
            .collect();
        host_entries.sort_by_key(|(config_idx, _, _)| *config_idx);
        self.hosts_array = host_entries.iter().map(|(_, _, idx)| *idx).collect();
        self.hosts_uid_cache = host_entries.iter().map(|(_, uid, _)| *uid).collect();
        for (_, _, idx) in &host_entries {
            let slots: Vec<usize> = self.host_pool.get(*idx).sps_bitset.iter_set().collect();
            let mut sps: Vec<SpGid> = slots.iter().map(|slot| self.slot_to_sp_gid[*slot]).collect();
            sps.sort();
            self.host_pool.get_mut(*idx).sps = sps;
        }

        self.lookup_tables_populated = true;
        debug!(
            "topology: populated lookup tables, n_sps={} n_hosts={}",
            self.sps_array.len(),
            self.hosts_array.len()
        );
    }

    fn ensure_populated(&mut self) {
        if !self.lookup_tables_populated {
            self.populate_group_cache_lookup_table();
        }
    }

    fn sp_by_gid(&self, sp_gid: SpGid) -> Result<&SpRecord, EngineError> {
        self.sps_hash
            .get(&sp_gid)
            .map(|idx| self.sp_pool.get(*idx))
            .ok_or(EngineError::NotInGroup)
    }

    fn host_at_idx(&self, host_idx: usize) -> Result<&HostRecord, EngineError> {
        let idx = *self.hosts_array.get(host_idx).ok_or(EngineError::NotInGroup)?;
        Ok(self.host_pool.get(idx))
    }

    // ---- Query surface ----

    /// `local_sp_id_by_group` / `sp_group_gid`: this SP's group-local ID.
    pub fn local_sp_id(&mut self, sp_gid: SpGid) -> Result<usize, EngineError> {
        self.ensure_populated();
        self.sp_by_gid(sp_gid).map(|sp| sp.lid)
    }

    /// `host_idx_by_group`: the array index of `host_uid` within the
    /// group's host array.
    pub fn host_idx(&mut self, host_uid: HostUid) -> Result<usize, EngineError> {
        self.ensure_populated();
        let idx = *self.hosts_hash.get(&host_uid).ok_or(EngineError::NotInGroup)?;
        self.hosts_array
            .iter()
            .position(|h| *h == idx)
            .ok_or(EngineError::NotInGroup)
    }

    /// `num_sps_by_group_host_idx`.
    pub fn num_sps_on_host_idx(&mut self, host_idx: usize) -> Result<u32, EngineError> {
        self.ensure_populated();
        Ok(self.host_at_idx(host_idx)?.num_sps)
    }

    /// `num_ranks_for_group_sp`.
    pub fn num_ranks_for_sp(&mut self, sp_gid: SpGid) -> Result<u32, EngineError> {
        self.ensure_populated();
        self.sp_by_gid(sp_gid).map(|sp| sp.n_ranks)
    }

    /// `num_ranks_for_group_host_local_sp`.
    pub fn num_ranks_for_host_local_sp(&mut self, host_idx: usize, sp_lid: usize) -> Result<u32, EngineError> {
        self.ensure_populated();
        let sp_gid = *self
            .host_at_idx(host_idx)?
            .sps
            .get(sp_lid)
            .ok_or(EngineError::NotInGroup)?;
        self.sp_by_gid(sp_gid).map(|sp| sp.n_ranks)
    }

    /// `rank_idx_by_group_host_idx`: dense index of `group_rank` within
    /// host `host_idx`'s rank array.
    pub fn rank_idx_by_host_idx(&mut self, host_idx: usize, group_rank: i64) -> Result<usize, EngineError> {
        self.ensure_populated();
        let host = self.host_at_idx(host_idx)?;
        if !host.ranks_bitset.test(group_rank as usize) {
            return Err(EngineError::NotInGroup);
        }
        Ok(host
            .ranks_bitset
            .iter_set()
            .position(|r| r as i64 == group_rank)
            .expect("just tested membership"))
    }

    /// `rank_idx_by_group_sp_id`: dense index of `group_rank` within
    /// `sp_gid`'s rank array.
    pub fn rank_idx_by_sp_id(&mut self, sp_gid: SpGid, group_rank: i64) -> Result<usize, EngineError> {
        self.ensure_populated();
        let sp = self.sp_by_gid(sp_gid)?;
        sp.ranks
            .iter()
            .position(|r| *r == group_rank)
            .ok_or(EngineError::NotInGroup)
    }

    /// `all_sps_by_group_host_idx`.
    pub fn all_sps_on_host(&mut self, host_idx: usize) -> Result<&[SpGid], EngineError> {
        self.ensure_populated();
        Ok(&self.host_at_idx(host_idx)?.sps)
    }

    /// `all_hosts_by_group`.
    pub fn all_hosts(&mut self) -> &[HostUid] {
        self.ensure_populated();
        &self.hosts_uid_cache
    }

    /// `all_ranks_by_group_sp_gid`.
    pub fn all_ranks_for_sp(&mut self, sp_gid: SpGid) -> Result<&[i64], EngineError> {
        self.ensure_populated();
        self.sp_by_gid(sp_gid).map(|sp| sp.ranks.as_slice())
    }

    /// `all_ranks_by_group_sp_lid(h, lid)`.
    pub fn all_ranks_for_host_lid(&mut self, host_idx: usize, sp_lid: usize) -> Result<&[i64], EngineError> {
        self.ensure_populated();
        let sp_gid = *self
            .host_at_idx(host_idx)?
            .sps
            .get(sp_lid)
            .ok_or(EngineError::NotInGroup)?;
        self.sp_by_gid(sp_gid).map(|sp| sp.ranks.as_slice())
    }

    /// `nth_sp_by_group_host_idx`.
    pub fn nth_sp_on_host(&mut self, host_idx: usize, n: usize) -> Result<SpGid, EngineError> {
        self.ensure_populated();
        self.host_at_idx(host_idx)?.sps.get(n).copied().ok_or(EngineError::NotInGroup)
    }

    /// `group_rank_host`: the host UID servicing `group_rank`.
    pub fn rank_host(&mut self, group_rank: i64) -> Result<HostUid, EngineError> {
        self.ensure_populated();
        for idx in self.hosts_hash.values() {
            let host = self.host_pool.get(*idx);
            if host.ranks_bitset.test(group_rank as usize) {
                return Ok(host.uid);
            }
        }
        Err(EngineError::NotInGroup)
    }

    /// `group_rank_sps`: every SP servicing `group_rank`.
    pub fn rank_sps(&mut self, group_rank: i64) -> Result<Vec<SpGid>, EngineError> {
        self.ensure_populated();
        let mut out: Vec<SpGid> = self
            .sps_hash
            .iter()
            .filter(|(_, idx)| self.sp_pool.get(**idx).ranks_bitset.test(group_rank as usize))
            .map(|(gid, _)| *gid)
            .collect();
        if out.is_empty() {
            return Err(EngineError::NotInGroup);
        }
        out.sort();
        Ok(out)
    }

    pub fn on_same_host(&mut self, r1: i64, r2: i64) -> Result<bool, EngineError> {
        Ok(self.rank_host(r1)? == self.rank_host(r2)?)
    }

    pub fn on_same_sp(&mut self, r1: i64, r2: i64) -> Result<bool, EngineError> {
        let sps1 = self.rank_sps(r1)?;
        let sps2 = self.rank_sps(r2)?;
        Ok(sps1.iter().any(|s| sps2.contains(s)))
    }
}
