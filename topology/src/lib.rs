//! Per-group topology index: incremental SP/host discovery plus the
//! dense-array query surface built on top of it.

pub mod bitset;
pub mod hosts_config;
pub mod index;
pub mod records;

pub use bitset::Bitset;
pub use hosts_config::HostsConfig;
pub use index::TopologyIndex;
pub use records::{HostRecord, SpRecord};

#[cfg(test)]
mod tests {
    use super::*;
    use cache_common::{EngineError, GroupUid, HostUid, SpGid};

    /// 32 hosts, 4 SPs/host, 16 ranks/SP, rank `i` lives on host `i/64`,
    /// shadow SP `(i/64)*4 + i%4`.
    fn fill_s1(topo: &mut TopologyIndex, hosts_config: &HostsConfig) {
        for rank in 0..2048i64 {
            let host = rank / 64;
            let sp = host * 4 + (rank % 4);
            topo.update_topology_data(rank, SpGid(sp as u64), HostUid(host as u64), hosts_config)
                .unwrap();
        }
    }

    fn s1_hosts_config() -> HostsConfig {
        HostsConfig::new((0..32).map(|h| HostUid(h as u64)).collect())
    }

    #[test_log::test]
    fn s1_basic_fill() {
        let hosts_config = s1_hosts_config();
        let mut topo = TopologyIndex::new(GroupUid(1), 2048);
        fill_s1(&mut topo, &hosts_config);
        topo.populate_group_cache_lookup_table();

        assert_eq!(topo.n_sps(), 128);
        assert_eq!(topo.n_hosts(), 32);
        assert_eq!(topo.sps_bitset_count(), 128);
        assert_eq!(topo.num_ranks_for_sp(SpGid(0)).unwrap(), 16);

        assert!(topo.on_same_sp(0, 128).unwrap());
        assert!(!topo.on_same_sp(0, 1).unwrap());
        assert!(topo.on_same_host(0, 63).unwrap());
        assert!(!topo.on_same_host(0, 64).unwrap());
    }

    /// S2: re-ingesting the same observation must not change any count.
    #[test_log::test]
    fn s2_idempotent_reobservation() {
        let hosts_config = s1_hosts_config();
        let mut topo = TopologyIndex::new(GroupUid(1), 2048);
        fill_s1(&mut topo, &hosts_config);
        let n_sps_before = topo.n_sps();
        let ranks_before = topo.num_ranks_for_sp(SpGid(0)).unwrap();

        topo.update_topology_data(0, SpGid(0), HostUid(0), &hosts_config).unwrap();

        assert_eq!(topo.n_sps(), n_sps_before);
        assert_eq!(topo.num_ranks_for_sp(SpGid(0)).unwrap(), ranks_before);
    }

    /// S5: a query triggers lazy population without an explicit call.
    #[test_log::test]
    fn s5_lazy_population_via_query() {
        let hosts_config = s1_hosts_config();
        let mut topo = TopologyIndex::new(GroupUid(1), 2048);
        fill_s1(&mut topo, &hosts_config);
        assert!(!topo.lookup_tables_populated());

        let host_idx = topo.host_idx(HostUid(0)).unwrap();
        assert_eq!(host_idx, 0);
        assert!(topo.lookup_tables_populated());
    }

    /// S6: querying an absent rank returns `NotInGroup`, not a panic, and
    /// leaves the already-populated state untouched.
    #[test_log::test]
    fn s6_query_for_absent_rank() {
        let hosts_config = s1_hosts_config();
        let mut topo = TopologyIndex::new(GroupUid(1), 2048);
        fill_s1(&mut topo, &hosts_config);
        topo.populate_group_cache_lookup_table();

        let host_idx = topo.host_idx(HostUid(0)).unwrap();
        let err = topo.rank_idx_by_host_idx(host_idx, 999).unwrap_err();
        assert_eq!(err, EngineError::NotInGroup);
        assert_eq!(topo.num_sps_on_host_idx(host_idx).unwrap(), 4);
    }

    #[test_log::test]
    fn reset_clears_everything() {
        let hosts_config = s1_hosts_config();
        let mut topo = TopologyIndex::new(GroupUid(1), 2048);
        fill_s1(&mut topo, &hosts_config);
        topo.populate_group_cache_lookup_table();
        topo.reset();
        assert_eq!(topo.n_sps(), 0);
        assert_eq!(topo.n_hosts(), 0);
        assert!(!topo.lookup_tables_populated());
    }
}
