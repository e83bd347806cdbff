use std::time::Instant;

use parking_lot::RwLock;
use swarm_core::Id20;
use tokio_util::sync::CancellationToken;

pub(crate) type ConnKey = (Id20, Id20);

/// Bookkeeping for one live peer link on one torrent.
///
/// The transport itself lives with whoever established the conn; this object
/// carries identity, progress timestamps and the close primitive. Closing is
/// a cancellation token: the task that owns the transport observes it (or
/// fires it on EOF) and emits exactly one `ClosedConn` event afterwards.
pub struct Conn {
    peer_id: Id20,
    info_hash: Id20,
    created_at: Instant,
    // Updated by the dispatcher from its own task, read by the preemption
    // tick on the loop thread.
    last_good_piece_received: RwLock<Instant>,
    last_piece_sent: RwLock<Instant>,
    cancel: CancellationToken,
}

impl Conn {
    pub fn new(peer_id: Id20, info_hash: Id20, now: Instant) -> Self {
        Self {
            peer_id,
            info_hash,
            created_at: now,
            last_good_piece_received: RwLock::new(now),
            last_piece_sent: RwLock::new(now),
            cancel: CancellationToken::new(),
        }
    }

    pub fn peer_id(&self) -> Id20 {
        self.peer_id
    }

    pub fn info_hash(&self) -> Id20 {
        self.info_hash
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn key(&self) -> ConnKey {
        (self.peer_id, self.info_hash)
    }

    pub fn mark_good_piece_received(&self, now: Instant) {
        *self.last_good_piece_received.write() = now;
    }

    pub fn mark_piece_sent(&self, now: Instant) {
        *self.last_piece_sent.write() = now;
    }

    /// The most recent of creation, last good piece received and last piece
    /// sent. A conn that never moved a piece is "progressing" from its
    /// creation instant.
    pub fn last_progress(&self) -> Instant {
        self.created_at
            .max(*self.last_good_piece_received.read())
            .max(*self.last_piece_sent.read())
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the conn is closed, from either side.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn(peer={:?}, hash={:?})", self.peer_id, self.info_hash)
    }
}
