//! Minimal out-of-band TCP handshake used to resolve peer endpoints
//! before the RDMA-capable messaging substrate takes over. This is
//! deliberately thin: it exchanges identity (SP global ID, host UID)
//! over a plain TCP connection and hands back the information the
//! caller needs to populate an [`crate::EndpointTable`]; it carries none
//! of the actual group-cache traffic.

use cache_common::{HostUid, SpGid};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeIdentity {
    pub sp_gid: SpGid,
    pub host_uid: HostUid,
}

impl HandshakeIdentity {
    fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&self.sp_gid.0.to_le_bytes());
        buf[8..16].copy_from_slice(&self.host_uid.0.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; 16]) -> Self {
        let sp_gid = SpGid(u64::from_le_bytes(buf[0..8].try_into().unwrap()));
        let host_uid = HostUid(u64::from_le_bytes(buf[8..16].try_into().unwrap()));
        HandshakeIdentity { sp_gid, host_uid }
    }
}

/// Connects to `addr`, exchanges identities, and returns the peer's.
pub async fn connect(addr: &str, local: HandshakeIdentity) -> std::io::Result<HandshakeIdentity> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&local.encode()).await?;
    let mut buf = [0u8; 16];
    stream.read_exact(&mut buf).await?;
    let peer = HandshakeIdentity::decode(&buf);
    debug!("handshake with {} resolved peer sp_gid={}", addr, peer.sp_gid.0);
    Ok(peer)
}

/// Binds a listener for the connection-accept loop and accepts one
/// handshake, returning the peer's identity and the still-open
/// stream (a real transport would keep it open for RDMA setup).
pub async fn accept_one(
    listener: &TcpListener,
    local: HandshakeIdentity,
) -> std::io::Result<(HandshakeIdentity, TcpStream)> {
    let (mut stream, peer_addr) = listener.accept().await?;
    let mut buf = [0u8; 16];
    stream.read_exact(&mut buf).await?;
    let peer = HandshakeIdentity::decode(&buf);
    stream.write_all(&local.encode()).await?;
    info!("accepted handshake from {} (sp_gid={})", peer_addr, peer.sp_gid.0);
    Ok((peer, stream))
}

pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_exchanges_identities() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server_identity = HandshakeIdentity {
            sp_gid: SpGid(1),
            host_uid: HostUid(10),
        };
        let client_identity = HandshakeIdentity {
            sp_gid: SpGid(2),
            host_uid: HostUid(20),
        };
        let server = tokio::spawn(async move { accept_one(&listener, server_identity).await });
        let client_peer = connect(&addr, client_identity).await.unwrap();
        assert_eq!(client_peer, server_identity);
        let (server_peer, _stream) = server.await.unwrap().unwrap();
        assert_eq!(server_peer, client_identity);
    }
}
