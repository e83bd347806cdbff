//!
//! The scheduler core of a peer-to-peer content distribution client: a
//! single-writer event loop that owns all per-peer and per-torrent state and
//! serializes the chaos of inbound handshakes, outbound dials, tracker
//! responses and timers into one sequence of state transitions.
//!
//! # Quick usage example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libswarm::{Scheduler, SchedulerConfig, SchedulerOptions};
//!
//! # fn collaborators() -> (Arc<dyn libswarm::DispatcherFactory>, Arc<dyn libswarm::TrackerClient>, Arc<dyn libswarm::Connector>, Arc<dyn libswarm::Torrent>) { unimplemented!() }
//! tokio_test::block_on(async {
//!     let (factory, tracker, connector, torrent) = collaborators();
//!     let handle = Scheduler::start(
//!         SchedulerConfig::default(),
//!         factory,
//!         tracker,
//!         connector,
//!         SchedulerOptions::default(),
//!     );
//!     handle.add_torrent(torrent).await.unwrap();
//!     handle.stop();
//! })
//! ```
//!
//! Wire handshaking, dialing and tracker RPC live behind the [`Connector`],
//! [`Listener`] and [`TrackerClient`] traits; per-torrent piece exchange
//! behind [`Dispatcher`]. The scheduler only ever talks to those seams.

mod announce_queue;
mod clock;
mod config;
mod conn;
mod conn_state;
mod connect;
mod dispatcher;
mod error;
mod event_loop;
mod events;
mod scheduler;
mod tracker;

pub use error::{Error, Result};

pub use clock::{Clock, SystemClock};
pub use config::SchedulerConfig;
pub use conn::Conn;
pub use connect::{Connector, IncomingHandshake, Listener, PendingPeer};
pub use dispatcher::{Dispatcher, DispatcherFactory, Torrent};
pub use event_loop::EventLoop;
pub use events::Event;
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerOptions};
pub use tracker::{PeerInfo, TrackerClient};

pub use swarm_core::peer_id::generate_peer_id;
pub use swarm_core::Id20;

#[cfg(test)]
mod tests;

/// The cargo version of libswarm.
pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
