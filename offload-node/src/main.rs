//! Executable entry point: parses the collaborator's bootstrap
//! parameters, builds the engine, and drives its two cooperating tasks
//! -- a progress loop and a connection-accept loop.
//!
//! The out-of-band TCP handshake resolves peer SP identities; the
//! in-process transport is the one concrete [`transport::Transport`] this
//! workspace ships, since the RDMA-capable messaging substrate itself is
//! an external collaborator out of scope here, so this binary's "fleet"
//! is every SP sharing one process -- the single-host deployment mode
//! the transport crate documents itself as supporting.

use cache_common::{GroupUid, HostUid, SpGid};
use clap::Parser;
use protocol::engine::BootstrapConfig;
use protocol::Engine;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use topology::HostsConfig;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transport::tcp_handshake::{self, HandshakeIdentity};
use transport::{EndpointId, InProcessTransport};

#[derive(Parser, Debug)]
#[command(author, version, about = "group membership and topology cache node", long_about = None)]
struct Cli {
    /// This process's host UID.
    #[arg(long)]
    host_uid: u64,

    /// This process's SP global ID.
    #[arg(long)]
    sp_gid: u64,

    /// Newline-delimited `host_uid,config_idx` file populating the
    /// engine-wide hosts_config array.
    #[arg(long)]
    hosts_file: String,

    /// The group UID treated as the distinguished "world" group.
    #[arg(long, default_value_t = u32::MAX as u64 - 1)]
    world_group_uid: u64,

    /// Address the out-of-band TCP handshake listener binds to.
    #[arg(long, default_value = "127.0.0.1:0")]
    bind_addr: String,
}

fn read_hosts_config(path: &str) -> std::io::Result<HostsConfig> {
    let contents = fs::read_to_string(path)?;
    let mut by_idx: Vec<(usize, HostUid)> = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ',');
        let host_uid: u64 = parts
            .next()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "missing host_uid"))?;
        let config_idx: usize = parts
            .next()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "missing config_idx"))?;
        by_idx.push((config_idx, HostUid(host_uid)));
    }
    by_idx.sort_by_key(|(idx, _)| *idx);
    Ok(HostsConfig::new(by_idx.into_iter().map(|(_, uid)| uid).collect()))
}

/// The progress loop: drives the transport and invokes receive
/// callbacks. The in-process transport delivers synchronously, so there
/// is nothing to advance for it
/// specifically, but this still drives the event channel's own
/// in-flight bookkeeping for every transport, matching how a real
/// RDMA-backed progress loop would be structured.
async fn progress_loop(engine: Arc<Engine>) {
    let mut tick = tokio::time::interval(Duration::from_millis(10));
    loop {
        tick.tick().await;
        engine.event_channel().progress();
    }
}

/// The connection-accept loop, serving the server role: resolves peer
/// SP identities via the out-of-band TCP handshake and registers their
/// endpoint with the engine.
async fn connection_accept_loop(engine: Arc<Engine>, local_identity: HandshakeIdentity, bind_addr: String) {
    let listener = match tcp_handshake::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind connection-accept listener: {e}");
            return;
        }
    };
    info!("connection-accept loop listening on {:?}", listener.local_addr());
    loop {
        match tcp_handshake::accept_one(&listener, local_identity).await {
            Ok((peer, _stream)) => {
                info!("resolved peer sp_gid={} host_uid={}", peer.sp_gid.0, peer.host_uid.0);
                // The in-process transport has no real wire; register the
                // peer under an endpoint id derived from its SP GID so
                // in-process delivery has somewhere to route to. A real
                // transport would instead keep `_stream` (or an RDMA
                // handle derived from it) and register that.
                engine.register_peer_sp_endpoint(peer.sp_gid, EndpointId(peer.sp_gid.0));
            }
            Err(e) => {
                warn!("connection-accept handshake failed: {e}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let hosts_config = read_hosts_config(&cli.hosts_file).map_err(|e| {
        error!("failed to read hosts file {}: {}", cli.hosts_file, e);
    })?;

    let self_host_uid = HostUid(cli.host_uid);
    let self_sp_gid = SpGid(cli.sp_gid);
    let world_group_uid = GroupUid(cli.world_group_uid as u32);

    let transport = Arc::new(InProcessTransport::new(self_sp_gid.0));
    let engine = Engine::new(
        BootstrapConfig {
            self_host_uid,
            self_sp_gid,
            hosts_config,
            world_group_uid,
        },
        transport,
        EndpointId(self_sp_gid.0),
    );

    info!("offload-node starting: host_uid={} sp_gid={}", self_host_uid.0, self_sp_gid.0);

    let local_identity = HandshakeIdentity {
        sp_gid: self_sp_gid,
        host_uid: self_host_uid,
    };

    tokio::join!(
        progress_loop(engine.clone()),
        connection_accept_loop(engine, local_identity, cli.bind_addr),
    );
    Ok(())
}
