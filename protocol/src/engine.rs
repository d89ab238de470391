//! The offloading engine: the single process-wide container passed
//! around as an explicit handle rather than reached via global statics.
//! Owns every group cache, the event channel, and the endpoint table,
//! behind one mutex that serializes all mutation of a group cache.

use cache_common::{EngineError, GroupUid, HostUid, SpGid};
use event_channel::EventChannel;
use group_cache::GroupCache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use topology::HostsConfig;
use transport::{EndpointId, EndpointTable, Transport};

/// Bootstrap parameters the collaborator provides: consumed by the core,
/// never read from the environment by it directly.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub self_host_uid: HostUid,
    pub self_sp_gid: SpGid,
    pub hosts_config: HostsConfig,
    pub world_group_uid: GroupUid,
}

pub(crate) struct EngineState {
    pub(crate) groups: HashMap<GroupUid, GroupCache>,
    pub(crate) local_rank_clients: HashMap<u64, EndpointId>,
}

/// The engine-wide mutex-protected container. Cheap to clone: every
/// field is an `Arc` or sits behind one.
pub struct Engine {
    pub(crate) self_host_uid: HostUid,
    pub(crate) self_sp_gid: SpGid,
    pub(crate) world_group_uid: GroupUid,
    pub(crate) hosts_config: HostsConfig,
    pub(crate) event_channel: Arc<EventChannel>,
    pub(crate) endpoints: Mutex<EndpointTable>,
    pub(crate) state: Mutex<EngineState>,
    /// A weak handle to this same engine, set at construction via
    /// `Arc::new_cyclic`. Event-channel completion callbacks need to
    /// reach back into the engine that installed them; storing the
    /// handle here lets any `&Engine` method hand out a `Weak<Engine>`
    /// without requiring the caller to already be holding an `Arc`.
    pub(crate) self_weak: Weak<Engine>,
}

impl Engine {
    /// Constructs the engine bound to `self_endpoint` on `transport` and
    /// registers the core's reserved event types. The engine is expected
    /// to live for the lifetime of the process.
    pub fn new(config: BootstrapConfig, transport: Arc<dyn Transport>, self_endpoint: EndpointId) -> Arc<Self> {
        let event_channel = EventChannel::bind(transport, self_endpoint, config.self_sp_gid.0);
        let engine = Arc::new_cyclic(|weak| Engine {
            self_host_uid: config.self_host_uid,
            self_sp_gid: config.self_sp_gid,
            world_group_uid: config.world_group_uid,
            hosts_config: config.hosts_config,
            event_channel,
            endpoints: Mutex::new(EndpointTable::new()),
            state: Mutex::new(EngineState {
                groups: HashMap::new(),
                local_rank_clients: HashMap::new(),
            }),
            self_weak: weak.clone(),
        });
        crate::fill::register_handlers(&engine);
        crate::revoke::register_handlers(&engine);
        engine
    }

    pub fn self_sp_gid(&self) -> SpGid {
        self.self_sp_gid
    }

    pub fn self_host_uid(&self) -> HostUid {
        self.self_host_uid
    }

    pub fn event_channel(&self) -> &Arc<EventChannel> {
        &self.event_channel
    }

    pub fn register_peer_sp_endpoint(&self, sp_gid: SpGid, endpoint: EndpointId) {
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner()).set_sp_endpoint(sp_gid, endpoint);
    }

    pub fn register_local_rank_client(&self, client_id: u64, endpoint: EndpointId) {
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_client_endpoint(client_id, endpoint);
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .local_rank_clients
            .insert(client_id, endpoint);
    }

    pub(crate) fn peer_sp_endpoints(&self) -> Vec<(SpGid, EndpointId)> {
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .all_sp_endpoints()
            .collect()
    }

    pub(crate) fn local_rank_endpoints(&self) -> Vec<(u64, EndpointId)> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .local_rank_clients
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect()
    }

    /// Runs `f` with exclusive access to the group cache for `group_uid`,
    /// creating it lazily on first reference. Held only for the duration
    /// of `f`: callers must not stash the
    /// `&mut GroupCache` they're handed.
    pub(crate) fn with_group<R>(&self, group_uid: GroupUid, group_size: i64, f: impl FnOnce(&mut GroupCache) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let is_world = group_uid == self.world_group_uid;
        let cache = state
            .groups
            .entry(group_uid)
            .or_insert_with(|| GroupCache::new(group_uid, group_size, is_world));
        f(cache)
    }

    /// Like [`Self::with_group`], but returns `NotInGroup` rather than
    /// creating the cache if it doesn't exist yet -- for query paths that
    /// must never conjure a group out of thin air.
    pub(crate) fn with_existing_group<R>(
        &self,
        group_uid: GroupUid,
        f: impl FnOnce(&mut GroupCache) -> R,
    ) -> Result<R, EngineError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let cache = state.groups.get_mut(&group_uid).ok_or(EngineError::NotInGroup)?;
        Ok(f(cache))
    }

    /// A weak handle callbacks can upgrade to reach back into the engine
    /// that installed them, without forcing a reference cycle through an
    /// `Arc<Engine>` stashed inside the event channel's registry.
    pub fn weak(&self) -> Weak<Self> {
        self.self_weak.clone()
    }
}
