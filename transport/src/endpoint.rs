//! Endpoint resolution: a cached endpoint per peer SP, and a
//! `(client_id, endpoint)` pair per locally connected rank client.

use cache_common::SpGid;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

#[derive(Default)]
pub struct EndpointTable {
    sp_endpoints: HashMap<SpGid, EndpointId>,
    client_endpoints: HashMap<u64, EndpointId>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sp_endpoint(&mut self, sp_gid: SpGid, endpoint: EndpointId) {
        self.sp_endpoints.insert(sp_gid, endpoint);
    }

    pub fn sp_endpoint(&self, sp_gid: SpGid) -> Option<EndpointId> {
        self.sp_endpoints.get(&sp_gid).copied()
    }

    pub fn all_sp_endpoints(&self) -> impl Iterator<Item = (SpGid, EndpointId)> + '_ {
        self.sp_endpoints.iter().map(|(k, v)| (*k, *v))
    }

    pub fn set_client_endpoint(&mut self, client_id: u64, endpoint: EndpointId) {
        self.client_endpoints.insert(client_id, endpoint);
    }

    pub fn client_endpoint(&self, client_id: u64) -> Option<EndpointId> {
        self.client_endpoints.get(&client_id).copied()
    }

    pub fn all_client_endpoints(&self) -> impl Iterator<Item = (u64, EndpointId)> + '_ {
        self.client_endpoints.iter().map(|(k, v)| (*k, *v))
    }
}
