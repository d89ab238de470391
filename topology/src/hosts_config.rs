//! The engine-wide `hosts_config` array the collaborator provides at
//! bootstrap: indexed `0..num_hosts` by `config_idx`, used by the
//! topology indexer to resolve a host UID's array position the first
//! time that host is seen in a group.

use cache_common::HostUid;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct HostsConfig {
    by_idx: Vec<HostUid>,
    idx_of: HashMap<HostUid, usize>,
}

impl HostsConfig {
    pub fn new(hosts: Vec<HostUid>) -> Self {
        let idx_of = hosts.iter().enumerate().map(|(i, h)| (*h, i)).collect();
        HostsConfig { by_idx: hosts, idx_of }
    }

    pub fn num_hosts(&self) -> usize {
        self.by_idx.len()
    }

    pub fn config_idx_of(&self, host_uid: HostUid) -> Option<usize> {
        self.idx_of.get(&host_uid).copied()
    }

    pub fn host_at(&self, config_idx: usize) -> Option<HostUid> {
        self.by_idx.get(config_idx).copied()
    }
}
