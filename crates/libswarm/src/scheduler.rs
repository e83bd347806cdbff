// The scheduler is the single-writer state engine of the client - admitting
// torrents, pairing them with peers, and deciding when to announce.
//
// ## Architecture
// One event-loop task owns every mutable table: conn state, the announce
// queue, and the per-torrent controls. Everything else (accepting sockets,
// handshaking, dialing, tracker RPC, the periodic timers, per-dispatcher
// piece exchange) runs on background tasks that never touch those tables.
// They communicate with the loop exclusively through `EventLoop::send`,
// which is a blocking rendezvous: a slow loop slows producers down instead
// of buffering unboundedly.
//
// ## Conn lifecycle
// State transitions, all applied on the loop thread:
// - pending (handshake in flight) -> active, via IncomingConn/OutgoingConn
// - pending -> blacklisted, via FailedHandshake
// - active -> blacklisted, via ClosedConn
// Each pending or active conn holds one unit of its torrent's capacity
// budget; the blacklist throttles reconnect churn until its TTL expires.
//
// The task that establishes a conn stays alive as its watcher: once the
// conn's close token fires (preemption, dispatcher teardown, transport EOF)
// it emits exactly one ClosedConn event and exits.

use std::{
    collections::{hash_map::Entry, HashMap},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use swarm_core::{
    peer_id::generate_peer_id,
    spawn_utils::{spawn, spawn_with_cancel},
    Id20,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error_span, info, trace, warn};

use crate::{
    announce_queue::AnnounceQueue,
    clock::{Clock, SystemClock},
    config::SchedulerConfig,
    conn::Conn,
    conn_state::ConnState,
    connect::{Connector, IncomingHandshake, Listener},
    dispatcher::{Dispatcher, DispatcherFactory, Torrent},
    event_loop::EventLoop,
    events::Event,
    tracker::{PeerInfo, TrackerClient},
    Error,
};

/// Per-torrent control record: the dispatcher driving its traffic plus the
/// completion waiters accumulated by repeated submissions.
struct TorrentControl {
    dispatcher: Arc<dyn Dispatcher>,
    waiters: Vec<oneshot::Sender<()>>,
    complete: bool,
}

impl TorrentControl {
    fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            waiters: Vec::new(),
            complete: false,
        }
    }
}

#[derive(Default)]
pub struct SchedulerOptions {
    /// Our own peer id; generated if not given.
    pub peer_id: Option<Id20>,
    /// Time source; the system clock if not given.
    pub clock: Option<Arc<dyn Clock>>,
    /// When present, the scheduler runs an accept loop over it.
    pub listener: Option<Arc<dyn Listener>>,
}

pub struct Scheduler {
    peer_id: Id20,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    conn_state: ConnState,
    announce_queue: AnnounceQueue,
    torrent_controls: HashMap<Id20, TorrentControl>,
    dispatcher_factory: Arc<dyn DispatcherFactory>,
    tracker: Arc<dyn TrackerClient>,
    connector: Arc<dyn Connector>,
    events: EventLoop,
    cancel: CancellationToken,
}

/// Externally visible face of a running scheduler.
pub struct SchedulerHandle {
    events: EventLoop,
    cancel: CancellationToken,
}

impl SchedulerHandle {
    /// Submits a torrent for download. Resolves once the torrent has
    /// completed; immediately if it already did on an earlier submission.
    pub async fn add_torrent(&self, torrent: Arc<dyn Torrent>) -> crate::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(Event::NewTorrent {
                torrent,
                completion: tx,
            })
            .await;
        rx.await.map_err(|_| Error::SchedulerStopped)
    }

    /// Stops the event loop and unwinds all background tasks. Events sent
    /// after this are dropped.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// The channel into the loop, for collaborators that emit events on
    /// their own (e.g. dispatchers signalling completion).
    pub fn events(&self) -> &EventLoop {
        &self.events
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SchedulerConfig,
        peer_id: Id20,
        clock: Arc<dyn Clock>,
        dispatcher_factory: Arc<dyn DispatcherFactory>,
        tracker: Arc<dyn TrackerClient>,
        connector: Arc<dyn Connector>,
        events: EventLoop,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            peer_id,
            conn_state: ConnState::new(config.max_conns_per_torrent, config.blacklist_duration),
            config,
            clock,
            announce_queue: Default::default(),
            torrent_controls: Default::default(),
            dispatcher_factory,
            tracker,
            connector,
            events,
            cancel,
        }
    }

    /// Starts the event loop, the periodic timers and (when configured) the
    /// accept loop. Runs until `SchedulerHandle::stop`.
    pub fn start(
        config: SchedulerConfig,
        dispatcher_factory: Arc<dyn DispatcherFactory>,
        tracker: Arc<dyn TrackerClient>,
        connector: Arc<dyn Connector>,
        opts: SchedulerOptions,
    ) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let (events, runner) = EventLoop::new(cancel.clone());
        let peer_id = opts.peer_id.unwrap_or_else(generate_peer_id);
        let clock = opts.clock.unwrap_or_else(|| Arc::new(SystemClock));

        info!(peer_id = ?peer_id, "starting scheduler");

        spawn_ticker(
            events.clone(),
            cancel.clone(),
            config.announce_tick_interval,
            "announce",
            || Event::AnnounceTick,
        );
        spawn_ticker(
            events.clone(),
            cancel.clone(),
            config.preemption_tick_interval,
            "preemption",
            || Event::PreemptionTick,
        );
        spawn_ticker(
            events.clone(),
            cancel.clone(),
            config.blacklist_cleanup_interval,
            "blacklist_cleanup",
            || Event::CleanupBlacklist,
        );

        if let Some(listener) = opts.listener {
            let events = events.clone();
            spawn_with_cancel(error_span!("accept_loop"), cancel.clone(), async move {
                // The accept loop lives as long as the scheduler; a failed
                // accept loses that socket, not the listener.
                loop {
                    match listener.accept().await {
                        Ok(handshake) => {
                            events.send(Event::IncomingHandshake(handshake)).await
                        }
                        Err(e) => {
                            warn!("error accepting incoming handshake: {e:#}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                #[allow(unreachable_code)]
                Ok::<(), anyhow::Error>(())
            });
        }

        let scheduler = Scheduler::new(
            config,
            peer_id,
            clock,
            dispatcher_factory,
            tracker,
            connector,
            events.clone(),
            cancel.clone(),
        );
        spawn(error_span!("event_loop"), async move {
            runner.run(scheduler).await;
            Ok::<(), anyhow::Error>(())
        });

        SchedulerHandle { events, cancel }
    }

    /// Applies one event. This is the only place scheduler state mutates;
    /// nothing here may block or send into our own loop.
    pub(crate) fn handle_event(&mut self, event: Event) {
        trace!(event = event.name(), "applying event");
        match event {
            Event::ClosedConn(conn) => self.on_closed_conn(conn),
            Event::FailedHandshake { peer_id, info_hash } => {
                self.on_failed_handshake(peer_id, info_hash)
            }
            Event::IncomingHandshake(handshake) => self.on_incoming_handshake(handshake),
            Event::IncomingConn { conn, torrent } => self.on_conn_established(conn, torrent, "incoming"),
            Event::OutgoingConn { conn, torrent } => self.on_conn_established(conn, torrent, "outgoing"),
            Event::AnnounceTick => self.on_announce_tick(),
            Event::AnnounceResponse { info_hash, peers } => {
                self.on_announce_response(info_hash, peers)
            }
            Event::AnnounceFailure { info_hash } => self.on_announce_failure(info_hash),
            Event::NewTorrent {
                torrent,
                completion,
            } => self.on_new_torrent(torrent, completion),
            Event::CompletedDispatcher { info_hash } => self.on_completed_dispatcher(info_hash),
            Event::PreemptionTick => self.on_preemption_tick(),
            Event::CleanupBlacklist => {
                self.conn_state.delete_stale_blacklist_entries(self.clock.now())
            }
        }
    }

    fn on_closed_conn(&mut self, conn: Arc<Conn>) {
        self.conn_state.delete_active(&conn);
        if let Err(e) = self
            .conn_state
            .blacklist(conn.peer_id(), conn.info_hash(), self.clock.now())
        {
            info!(conn = ?conn, "error blacklisting closed conn: {e}");
        }
    }

    fn on_failed_handshake(&mut self, peer_id: Id20, info_hash: Id20) {
        self.conn_state.delete_pending(peer_id, info_hash);
        if let Err(e) = self.conn_state.blacklist(peer_id, info_hash, self.clock.now()) {
            info!(peer = ?peer_id, hash = ?info_hash, "error blacklisting failed handshake: {e}");
        }
    }

    fn on_incoming_handshake(&mut self, handshake: IncomingHandshake) {
        let IncomingHandshake {
            peer_id,
            info_hash,
            pending,
        } = handshake;
        if let Err(e) = self.conn_state.add_pending(peer_id, info_hash, self.clock.now()) {
            // Dropping the pending half closes its socket.
            debug!(peer = ?peer_id, hash = ?info_hash, "rejecting incoming handshake: {e}");
            return;
        }
        let events = self.events.clone();
        spawn_with_cancel(
            error_span!("incoming_handshake", peer = ?peer_id, hash = ?info_hash),
            self.cancel.clone(),
            async move {
                match pending.establish().await {
                    Ok((conn, torrent)) => {
                        events
                            .send(Event::IncomingConn {
                                conn: conn.clone(),
                                torrent,
                            })
                            .await;
                        conn.closed().await;
                        events.send(Event::ClosedConn(conn)).await;
                    }
                    Err(e) => {
                        debug!("incoming handshake failed: {e:#}");
                        events
                            .send(Event::FailedHandshake { peer_id, info_hash })
                            .await;
                    }
                }
                Ok::<(), anyhow::Error>(())
            },
        );
    }

    fn on_conn_established(&mut self, conn: Arc<Conn>, torrent: Arc<dyn Torrent>, direction: &str) {
        if let Err(e) = self.add_conn(&conn) {
            debug!(conn = ?conn, hash = ?torrent.info_hash(), "error adding {direction} conn: {e}");
            // The conn's watcher turns this into a ClosedConn event, which
            // cleans up whatever state the partial add left behind.
            conn.close();
        }
    }

    fn add_conn(&mut self, conn: &Arc<Conn>) -> crate::Result<()> {
        self.conn_state.move_pending_to_active(conn.clone())?;
        let ctrl = self
            .torrent_controls
            .get(&conn.info_hash())
            .ok_or(Error::TorrentNotFound(conn.info_hash()))?;
        ctrl.dispatcher.add_conn(conn.clone())?;
        Ok(())
    }

    fn on_announce_tick(&mut self) {
        let dispatcher = match self.announce_queue.next() {
            Some(d) => d,
            None => {
                trace!("no dispatchers in announce queue");
                return;
            }
        };
        let info_hash = dispatcher.info_hash();
        let tracker = self.tracker.clone();
        let events = self.events.clone();
        spawn_with_cancel(
            error_span!("announce", hash = ?info_hash),
            self.cancel.clone(),
            async move {
                match tracker.announce(info_hash).await {
                    Ok(peers) => {
                        events
                            .send(Event::AnnounceResponse { info_hash, peers })
                            .await
                    }
                    Err(e) => {
                        debug!("announce failed: {e:#}");
                        events.send(Event::AnnounceFailure { info_hash }).await;
                    }
                }
                Ok::<(), anyhow::Error>(())
            },
        );
    }

    fn on_announce_response(&mut self, info_hash: Id20, peers: Vec<PeerInfo>) {
        // Whatever happens below, the dispatcher may announce again.
        self.announce_queue.ready(info_hash);

        let ctrl = match self.torrent_controls.get(&info_hash) {
            Some(ctrl) => ctrl,
            None => {
                debug!(hash = ?info_hash, "dispatcher torn down after announce response");
                return;
            }
        };
        let torrent = ctrl.dispatcher.torrent();
        let now = self.clock.now();
        for p in peers {
            let peer_id = match Id20::from_str(&p.peer_id) {
                Ok(peer_id) => peer_id,
                Err(e) => {
                    debug!(peer = %p.peer_id, hash = ?info_hash, "bad peer id in announce response: {e}");
                    continue;
                }
            };
            if peer_id == self.peer_id {
                // The tracker may return ourselves.
                continue;
            }
            match self.conn_state.add_pending(peer_id, info_hash, now) {
                Ok(()) => self.spawn_outgoing_conn(peer_id, p.addr(), torrent.clone()),
                Err(Error::TorrentAtCapacity) => {
                    debug!(hash = ?info_hash, "torrent at capacity, not dialing further peers");
                    break;
                }
                Err(e) => {
                    debug!(peer = ?peer_id, hash = ?info_hash, "cannot add pending conn: {e}, skipping");
                    continue;
                }
            }
        }
    }

    fn spawn_outgoing_conn(
        &self,
        peer_id: Id20,
        addr: std::net::SocketAddr,
        torrent: Arc<dyn Torrent>,
    ) {
        let info_hash = torrent.info_hash();
        let connector = self.connector.clone();
        let events = self.events.clone();
        spawn_with_cancel(
            error_span!("outgoing_handshake", peer = ?peer_id, hash = ?info_hash),
            self.cancel.clone(),
            async move {
                match connector.connect(peer_id, addr, torrent.clone()).await {
                    Ok(conn) => {
                        events
                            .send(Event::OutgoingConn {
                                conn: conn.clone(),
                                torrent,
                            })
                            .await;
                        conn.closed().await;
                        events.send(Event::ClosedConn(conn)).await;
                    }
                    Err(e) => {
                        debug!("outgoing handshake failed: {e:#}");
                        events
                            .send(Event::FailedHandshake { peer_id, info_hash })
                            .await;
                    }
                }
                Ok::<(), anyhow::Error>(())
            },
        );
    }

    fn on_announce_failure(&mut self, info_hash: Id20) {
        self.announce_queue.ready(info_hash);
    }

    fn on_new_torrent(&mut self, torrent: Arc<dyn Torrent>, completion: oneshot::Sender<()>) {
        let info_hash = torrent.info_hash();
        let ctrl = match self.torrent_controls.entry(info_hash) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => {
                info!(hash = ?info_hash, "new torrent");
                let dispatcher = self
                    .dispatcher_factory
                    .new_dispatcher(torrent, self.events.clone());
                self.announce_queue.add(dispatcher.clone());
                self.conn_state.init_capacity(info_hash);
                v.insert(TorrentControl::new(dispatcher))
            }
        };
        if ctrl.complete {
            let _ = completion.send(());
        } else {
            ctrl.waiters.push(completion);
        }
    }

    fn on_completed_dispatcher(&mut self, info_hash: Id20) {
        // No more scheduled announces; the dispatcher issues its own final
        // one.
        self.announce_queue.done(info_hash);
        let ctrl = match self.torrent_controls.get_mut(&info_hash) {
            Some(ctrl) => ctrl,
            None => {
                warn!(hash = ?info_hash, "completed dispatcher not found");
                return;
            }
        };
        info!(hash = ?info_hash, "torrent completed");
        for waiter in ctrl.waiters.drain(..) {
            let _ = waiter.send(());
        }
        ctrl.complete = true;
    }

    fn on_preemption_tick(&mut self) {
        let now = self.clock.now();

        for conn in self.conn_state.active_conns() {
            if now.duration_since(conn.last_progress()) > self.config.idle_conn_ttl {
                info!(conn = ?conn, "closing idle conn");
                conn.close();
                continue;
            }
            if now.duration_since(conn.created_at()) > self.config.conn_ttl {
                info!(conn = ?conn, "closing expired conn");
                conn.close();
            }
        }

        let idle_seeder_ttl = self.config.idle_seeder_ttl;
        self.torrent_controls.retain(|info_hash, ctrl| {
            if ctrl.complete && ctrl.dispatcher.is_empty() {
                let became_idle = ctrl
                    .dispatcher
                    .created_at()
                    .max(ctrl.dispatcher.last_conn_removed());
                if now.duration_since(became_idle) > idle_seeder_ttl {
                    info!(hash = ?info_hash, "removing idle seeding torrent");
                    return false;
                }
            }
            true
        });
    }
}

#[cfg(test)]
impl Scheduler {
    pub(crate) fn conn_state(&self) -> &ConnState {
        &self.conn_state
    }

    pub(crate) fn has_torrent_control(&self, info_hash: Id20) -> bool {
        self.torrent_controls.contains_key(&info_hash)
    }
}

fn spawn_ticker(
    events: EventLoop,
    cancel: CancellationToken,
    period: Duration,
    kind: &'static str,
    make: fn() -> Event,
) {
    spawn_with_cancel(error_span!("ticker", kind = kind), cancel, async move {
        let mut interval = tokio::time::interval(period);
        // The zeroth tick fires immediately; the loop starts one period in.
        interval.tick().await;
        loop {
            interval.tick().await;
            events.send(make()).await;
        }
        #[allow(unreachable_code)]
        Ok::<(), anyhow::Error>(())
    });
}
