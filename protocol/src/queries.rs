//! Topology query delegation: thin wrappers that look a group cache up
//! under the engine mutex and forward into its `TopologyIndex`. Every
//! query returns `NotInGroup` for an unknown `group_uid` rather than
//! creating one -- queries must never conjure a group cache into
//! existence.

use crate::engine::Engine;
use cache_common::{EngineError, GroupUid, HostUid, SpGid};

impl Engine {
    pub fn global_sp_id_by_group(&self, group_uid: GroupUid) -> Result<SpGid, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.global_sp_id_by_group(self.self_sp_gid))?
    }

    pub fn local_sp_id_by_group(&self, group_uid: GroupUid, sp_gid: SpGid) -> Result<usize, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.local_sp_id(sp_gid))?
    }

    pub fn host_idx_by_group(&self, group_uid: GroupUid) -> Result<usize, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.host_idx_by_group(self.self_host_uid))?
    }

    pub fn num_sps_by_group_host_idx(&self, group_uid: GroupUid, host_idx: usize) -> Result<u32, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.num_sps_on_host_idx(host_idx))?
    }

    pub fn num_ranks_for_group_sp(&self, group_uid: GroupUid, sp_gid: SpGid) -> Result<u32, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.num_ranks_for_sp(sp_gid))?
    }

    pub fn num_ranks_for_group_host_local_sp(
        &self,
        group_uid: GroupUid,
        host_idx: usize,
        sp_lid: usize,
    ) -> Result<u32, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.num_ranks_for_host_local_sp(host_idx, sp_lid))?
    }

    pub fn rank_idx_by_group_host_idx(&self, group_uid: GroupUid, host_idx: usize, rank: i64) -> Result<usize, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.rank_idx_by_host_idx(host_idx, rank))?
    }

    pub fn rank_idx_by_group_sp_id(&self, group_uid: GroupUid, sp_gid: SpGid, rank: i64) -> Result<usize, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.rank_idx_by_sp_id(sp_gid, rank))?
    }

    pub fn all_sps_by_group_host_idx(&self, group_uid: GroupUid, host_idx: usize) -> Result<Vec<SpGid>, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.all_sps_on_host(host_idx).map(|s| s.to_vec()))?
    }

    pub fn all_hosts_by_group(&self, group_uid: GroupUid) -> Result<Vec<HostUid>, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.all_hosts().to_vec())
    }

    pub fn all_ranks_by_group_sp_gid(&self, group_uid: GroupUid, sp_gid: SpGid) -> Result<Vec<i64>, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.all_ranks_for_sp(sp_gid).map(|r| r.to_vec()))?
    }

    pub fn all_ranks_by_group_sp_lid(&self, group_uid: GroupUid, host_idx: usize, sp_lid: usize) -> Result<Vec<i64>, EngineError> {
        self.with_existing_group(group_uid, |cache| {
            cache.topology.all_ranks_for_host_lid(host_idx, sp_lid).map(|r| r.to_vec())
        })?
    }

    pub fn nth_sp_by_group_host_idx(&self, group_uid: GroupUid, host_idx: usize, n: usize) -> Result<SpGid, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.nth_sp_on_host(host_idx, n))?
    }

    pub fn sp_group_gid(&self, group_uid: GroupUid, sp_gid: SpGid) -> Result<usize, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.local_sp_id(sp_gid))?
    }

    pub fn group_rank_host(&self, group_uid: GroupUid, rank: i64) -> Result<HostUid, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.rank_host(rank))?
    }

    pub fn group_rank_sps(&self, group_uid: GroupUid, rank: i64) -> Result<Vec<SpGid>, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.rank_sps(rank))?
    }

    pub fn on_same_host(&self, group_uid: GroupUid, r1: i64, r2: i64) -> Result<bool, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.on_same_host(r1, r2))?
    }

    pub fn on_same_sp(&self, group_uid: GroupUid, r1: i64, r2: i64) -> Result<bool, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.topology.on_same_sp(r1, r2))?
    }

    pub fn is_group_complete(&self, group_uid: GroupUid) -> Result<bool, EngineError> {
        self.with_existing_group(group_uid, |cache| cache.is_complete())
    }
}
