use swarm_core::Id20;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("torrent is at capacity")]
    TorrentAtCapacity,
    #[error("conn is already pending")]
    DuplicatePendingConn,
    #[error("conn is already active")]
    DuplicateActiveConn,
    #[error("conn is blacklisted")]
    ConnBlacklisted,

    #[error("no pending conn for peer")]
    PendingConnNotFound,
    #[error("no torrent control for {0:?}")]
    TorrentNotFound(Id20),

    #[error("bug: cannot blacklist conn which is still pending or active")]
    BugConnStillOpen,

    #[error("scheduler is stopped")]
    SchedulerStopped,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
