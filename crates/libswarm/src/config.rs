use std::time::Duration;

/// Tunables for the scheduler. All TTL comparisons go through [`crate::Clock`].
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Budget of pending + active conns per torrent.
    pub max_conns_per_torrent: usize,
    /// How long a closed or failed peer stays barred from re-admission.
    pub blacklist_duration: Duration,
    /// Conns with no piece traffic for this long get preempted.
    pub idle_conn_ttl: Duration,
    /// Absolute age limit of a conn, busy or not.
    pub conn_ttl: Duration,
    /// Completed torrents with no conns get dropped after this long.
    pub idle_seeder_ttl: Duration,
    pub announce_tick_interval: Duration,
    pub preemption_tick_interval: Duration,
    pub blacklist_cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_conns_per_torrent: 20,
            blacklist_duration: Duration::from_secs(60),
            idle_conn_ttl: Duration::from_secs(5 * 60),
            conn_ttl: Duration::from_secs(60 * 60),
            idle_seeder_ttl: Duration::from_secs(10 * 60),
            announce_tick_interval: Duration::from_secs(3),
            preemption_tick_interval: Duration::from_secs(30),
            blacklist_cleanup_interval: Duration::from_secs(10 * 60),
        }
    }
}
