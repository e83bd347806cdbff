use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use swarm_core::Id20;

/// One peer as returned by the tracker. The id arrives as an untrusted
/// string; announce-response handling parses and may discard it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerInfo {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Announce RPC to the central tracker. Invoked from a background task; the
/// outcome re-enters the loop as `AnnounceResponse` or `AnnounceFailure`.
#[async_trait]
pub trait TrackerClient: Send + Sync + 'static {
    async fn announce(&self, info_hash: Id20) -> anyhow::Result<Vec<PeerInfo>>;
}
