use std::sync::Arc;

use swarm_core::Id20;
use tokio::sync::oneshot;

use crate::{
    conn::Conn,
    connect::IncomingHandshake,
    dispatcher::Torrent,
    tracker::PeerInfo,
};

/// A state transition of the scheduler. The set is closed: every mutation
/// of scheduler state is one of these, applied one at a time by the event
/// loop. While a variant is being applied it is the sole accessor of
/// scheduler state.
pub enum Event {
    /// A conn was closed, by either side or by preemption.
    ClosedConn(Arc<Conn>),
    /// A pending conn (inbound or outbound) failed to handshake.
    FailedHandshake { peer_id: Id20, info_hash: Id20 },
    /// The listener accepted a socket and read the remote handshake.
    IncomingHandshake(IncomingHandshake),
    /// A pending incoming conn finished handshaking.
    IncomingConn {
        conn: Arc<Conn>,
        torrent: Arc<dyn Torrent>,
    },
    /// A pending outgoing conn finished handshaking.
    OutgoingConn {
        conn: Arc<Conn>,
        torrent: Arc<dyn Torrent>,
    },
    /// Time to announce the next queued dispatcher.
    AnnounceTick,
    /// The tracker answered an announce.
    AnnounceResponse {
        info_hash: Id20,
        peers: Vec<PeerInfo>,
    },
    /// An announce request failed; retried on a later tick.
    AnnounceFailure { info_hash: Id20 },
    /// A torrent was submitted for download. `completion` fires once the
    /// torrent has finished downloading.
    NewTorrent {
        torrent: Arc<dyn Torrent>,
        completion: oneshot::Sender<()>,
    },
    /// A dispatcher finished downloading its torrent.
    CompletedDispatcher { info_hash: Id20 },
    /// Time to preempt stale conns and drop idle seeders.
    PreemptionTick,
    /// Time to drop expired blacklist entries.
    CleanupBlacklist,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ClosedConn(_) => "closed_conn",
            Event::FailedHandshake { .. } => "failed_handshake",
            Event::IncomingHandshake(_) => "incoming_handshake",
            Event::IncomingConn { .. } => "incoming_conn",
            Event::OutgoingConn { .. } => "outgoing_conn",
            Event::AnnounceTick => "announce_tick",
            Event::AnnounceResponse { .. } => "announce_response",
            Event::AnnounceFailure { .. } => "announce_failure",
            Event::NewTorrent { .. } => "new_torrent",
            Event::CompletedDispatcher { .. } => "completed_dispatcher",
            Event::PreemptionTick => "preemption_tick",
            Event::CleanupBlacklist => "cleanup_blacklist",
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
