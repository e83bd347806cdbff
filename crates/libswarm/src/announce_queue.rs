use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use swarm_core::Id20;

use crate::dispatcher::Dispatcher;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum EntryState {
    Queued,
    InFlight,
}

struct Entry {
    dispatcher: Arc<dyn Dispatcher>,
    state: EntryState,
}

/// Fair FIFO of dispatchers eligible to announce. One announce per
/// dispatcher is in flight at a time; re-admission via `ready` goes to the
/// tail, so continuously announcing torrents take turns.
#[derive(Default)]
pub(crate) struct AnnounceQueue {
    // Ids whose entry is gone or in flight linger here and are skipped
    // lazily by `next`.
    queue: VecDeque<Id20>,
    entries: HashMap<Id20, Entry>,
}

impl AnnounceQueue {
    pub fn add(&mut self, dispatcher: Arc<dyn Dispatcher>) {
        let info_hash = dispatcher.info_hash();
        if self.entries.contains_key(&info_hash) {
            return;
        }
        self.entries.insert(
            info_hash,
            Entry {
                dispatcher,
                state: EntryState::Queued,
            },
        );
        self.queue.push_back(info_hash);
    }

    /// Pops the next ready dispatcher and marks it in flight.
    pub fn next(&mut self) -> Option<Arc<dyn Dispatcher>> {
        while let Some(info_hash) = self.queue.pop_front() {
            match self.entries.get_mut(&info_hash) {
                Some(entry) if entry.state == EntryState::Queued => {
                    entry.state = EntryState::InFlight;
                    return Some(entry.dispatcher.clone());
                }
                _ => continue,
            }
        }
        None
    }

    /// Re-admits an in-flight dispatcher at the tail. No-op for removed or
    /// already queued entries.
    pub fn ready(&mut self, info_hash: Id20) {
        if let Some(entry) = self.entries.get_mut(&info_hash) {
            if entry.state == EntryState::InFlight {
                entry.state = EntryState::Queued;
                self.queue.push_back(info_hash);
            }
        }
    }

    /// Removes the entry permanently. Later `ready` calls for it are
    /// ignored.
    pub fn done(&mut self, info_hash: Id20) {
        self.entries.remove(&info_hash);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{conn::Conn, dispatcher::Torrent};

    struct NullTorrent(Id20);

    impl Torrent for NullTorrent {
        fn info_hash(&self) -> Id20 {
            self.0
        }
    }

    struct NullDispatcher {
        torrent: Arc<dyn Torrent>,
        created_at: Instant,
    }

    impl Dispatcher for NullDispatcher {
        fn torrent(&self) -> Arc<dyn Torrent> {
            self.torrent.clone()
        }
        fn created_at(&self) -> Instant {
            self.created_at
        }
        fn last_conn_removed(&self) -> Instant {
            self.created_at
        }
        fn is_empty(&self) -> bool {
            true
        }
        fn add_conn(&self, _conn: Arc<Conn>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn id(b: u8) -> Id20 {
        Id20::new([b; 20])
    }

    fn dispatcher(b: u8) -> Arc<dyn Dispatcher> {
        Arc::new(NullDispatcher {
            torrent: Arc::new(NullTorrent(id(b))),
            created_at: Instant::now(),
        })
    }

    #[test]
    fn test_next_on_empty() {
        let mut q = AnnounceQueue::default();
        assert!(q.next().is_none());
    }

    #[test]
    fn test_in_flight_not_rescheduled_until_ready() {
        let mut q = AnnounceQueue::default();
        q.add(dispatcher(1));

        let d = q.next().unwrap();
        assert_eq!(d.info_hash(), id(1));
        assert!(q.next().is_none());

        q.ready(id(1));
        assert_eq!(q.next().unwrap().info_hash(), id(1));
    }

    #[test]
    fn test_fifo_fairness_across_readies() {
        let mut q = AnnounceQueue::default();
        q.add(dispatcher(1));
        q.add(dispatcher(2));

        for _ in 0..3 {
            assert_eq!(q.next().unwrap().info_hash(), id(1));
            q.ready(id(1));
            assert_eq!(q.next().unwrap().info_hash(), id(2));
            q.ready(id(2));
        }
    }

    #[test]
    fn test_done_removes_entry_for_good() {
        let mut q = AnnounceQueue::default();
        q.add(dispatcher(1));
        q.add(dispatcher(2));

        let d = q.next().unwrap();
        q.done(d.info_hash());
        // Ready after done is ignored.
        q.ready(id(1));

        assert_eq!(q.next().unwrap().info_hash(), id(2));
        assert!(q.next().is_none());
    }

    #[test]
    fn test_done_while_queued() {
        let mut q = AnnounceQueue::default();
        q.add(dispatcher(1));
        q.add(dispatcher(2));
        q.done(id(1));
        assert_eq!(q.next().unwrap().info_hash(), id(2));
        assert!(q.next().is_none());
    }

    #[test]
    fn test_duplicate_add_ignored() {
        let mut q = AnnounceQueue::default();
        q.add(dispatcher(1));
        q.add(dispatcher(1));
        assert_eq!(q.next().unwrap().info_hash(), id(1));
        assert!(q.next().is_none());
    }
}
