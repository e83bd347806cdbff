use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use swarm_core::Id20;

use crate::{
    conn::Conn,
    dispatcher::Torrent,
};

/// An accepted socket whose remote handshake has been read but not yet
/// answered. Dropping it without establishing closes the socket.
#[async_trait]
pub trait PendingPeer: Send + 'static {
    /// Finishes the handshake: sends our reply, opens the torrent, and
    /// yields the live conn.
    async fn establish(self: Box<Self>) -> anyhow::Result<(Arc<Conn>, Arc<dyn Torrent>)>;
}

/// What the listener hands the scheduler per accepted socket.
pub struct IncomingHandshake {
    pub peer_id: Id20,
    pub info_hash: Id20,
    pub pending: Box<dyn PendingPeer>,
}

impl std::fmt::Debug for IncomingHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "incoming_handshake(peer={:?}, hash={:?})",
            self.peer_id, self.info_hash
        )
    }
}

/// Accepts sockets and reads the remote handshake. The scheduler runs one
/// accept loop over this when configured with a listener.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    async fn accept(&self) -> anyhow::Result<IncomingHandshake>;
}

/// Outbound dial + handshake towards a peer learned from the tracker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        peer_id: Id20,
        addr: SocketAddr,
        torrent: Arc<dyn Torrent>,
    ) -> anyhow::Result<Arc<Conn>>;
}
