use std::{sync::Arc, time::Instant};

use swarm_core::Id20;

use crate::conn::Conn;

/// Identity of a torrent as the scheduler sees it. Metadata, piece layout
/// and storage stay behind the collaborators that need them.
pub trait Torrent: Send + Sync + 'static {
    fn info_hash(&self) -> Id20;
}

/// Per-torrent piece-exchange engine. The scheduler hands it conns and
/// consults it for idle-seeder eviction; everything else (piece selection,
/// wire traffic, its final announce on completion) is the dispatcher's own
/// business. Completion is signalled back as a `CompletedDispatcher` event.
pub trait Dispatcher: Send + Sync + 'static {
    fn torrent(&self) -> Arc<dyn Torrent>;

    fn info_hash(&self) -> Id20 {
        self.torrent().info_hash()
    }

    fn created_at(&self) -> Instant;

    /// When the last conn was deregistered. Together with `created_at` this
    /// bounds how long a completed torrent has been idle.
    fn last_conn_removed(&self) -> Instant;

    /// True iff no conns are currently registered.
    fn is_empty(&self) -> bool;

    /// Takes ownership of a fully handshaked active conn.
    fn add_conn(&self, conn: Arc<Conn>) -> anyhow::Result<()>;
}

pub trait DispatcherFactory: Send + Sync + 'static {
    /// Builds the dispatcher for a newly admitted torrent. `events` is the
    /// dispatcher's channel back into the scheduler, e.g. for signalling
    /// completion.
    fn new_dispatcher(
        &self,
        torrent: Arc<dyn Torrent>,
        events: crate::EventLoop,
    ) -> Arc<dyn Dispatcher>;
}
