use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use swarm_core::Id20;

use crate::{
    conn::{Conn, ConnKey},
    Error,
};

/// Pending / active / blacklisted conns, plus the per-torrent capacity
/// budget. Mutated only from the event-loop thread, so plain collections.
///
/// Invariant for every known torrent `h`:
///   pending(h) + active(h) + capacity(h) == max_conns_per_torrent
pub(crate) struct ConnState {
    max_conns_per_torrent: usize,
    blacklist_duration: Duration,
    pending: HashSet<ConnKey>,
    active: HashMap<ConnKey, Arc<Conn>>,
    // Value is the expiry instant.
    blacklist: HashMap<ConnKey, Instant>,
    capacity: HashMap<Id20, usize>,
}

impl ConnState {
    pub fn new(max_conns_per_torrent: usize, blacklist_duration: Duration) -> Self {
        Self {
            max_conns_per_torrent,
            blacklist_duration,
            pending: Default::default(),
            active: Default::default(),
            blacklist: Default::default(),
            capacity: Default::default(),
        }
    }

    /// Gives a newly admitted torrent its conn budget. Idempotent.
    pub fn init_capacity(&mut self, info_hash: Id20) {
        self.capacity
            .entry(info_hash)
            .or_insert(self.max_conns_per_torrent);
    }

    /// Reserves a capacity unit for a handshake in flight.
    ///
    /// `Error::TorrentAtCapacity` is the only failure callers treat as
    /// "stop trying peers on this torrent"; the pair-specific failures mean
    /// "skip this peer only".
    pub fn add_pending(&mut self, peer_id: Id20, info_hash: Id20, now: Instant) -> crate::Result<()> {
        let key = (peer_id, info_hash);
        if self.is_blacklisted(&key, now) {
            return Err(Error::ConnBlacklisted);
        }
        if self.pending.contains(&key) {
            return Err(Error::DuplicatePendingConn);
        }
        if self.active.contains_key(&key) {
            return Err(Error::DuplicateActiveConn);
        }
        let capacity = self
            .capacity
            .entry(info_hash)
            .or_insert(self.max_conns_per_torrent);
        if *capacity == 0 {
            return Err(Error::TorrentAtCapacity);
        }
        *capacity -= 1;
        self.pending.insert(key);
        Ok(())
    }

    /// Releases the reservation of a failed handshake. No-op if absent.
    pub fn delete_pending(&mut self, peer_id: Id20, info_hash: Id20) {
        if self.pending.remove(&(peer_id, info_hash)) {
            self.release_capacity(info_hash);
        }
    }

    /// Promotes a fully handshaked conn. Capacity is unchanged: the unit
    /// reserved at `add_pending` now backs the active conn.
    pub fn move_pending_to_active(&mut self, conn: Arc<Conn>) -> crate::Result<()> {
        let key = conn.key();
        if !self.pending.contains(&key) {
            return Err(Error::PendingConnNotFound);
        }
        if self.active.contains_key(&key) {
            return Err(Error::DuplicateActiveConn);
        }
        self.pending.remove(&key);
        self.active.insert(key, conn);
        Ok(())
    }

    /// Removes a closed conn and frees its capacity unit. No-op if absent.
    pub fn delete_active(&mut self, conn: &Conn) {
        if self.active.remove(&conn.key()).is_some() {
            self.release_capacity(conn.info_hash());
        }
    }

    /// Bars the pair from re-admission until `now + blacklist_duration`.
    /// Re-blacklisting refreshes the expiry in place. Errors iff the pair is
    /// still pending or active, which is a caller bug.
    pub fn blacklist(&mut self, peer_id: Id20, info_hash: Id20, now: Instant) -> crate::Result<()> {
        let key = (peer_id, info_hash);
        if self.pending.contains(&key) || self.active.contains_key(&key) {
            return Err(Error::BugConnStillOpen);
        }
        self.blacklist.insert(key, now + self.blacklist_duration);
        Ok(())
    }

    pub fn active_conns(&self) -> Vec<Arc<Conn>> {
        self.active.values().cloned().collect()
    }

    pub fn delete_stale_blacklist_entries(&mut self, now: Instant) {
        self.blacklist.retain(|_, expiry| *expiry > now);
    }

    fn is_blacklisted(&self, key: &ConnKey, now: Instant) -> bool {
        // An expired entry the cleaner has not visited yet does not bar
        // anything.
        self.blacklist.get(key).is_some_and(|expiry| *expiry > now)
    }

    fn release_capacity(&mut self, info_hash: Id20) {
        if let Some(capacity) = self.capacity.get_mut(&info_hash) {
            *capacity += 1;
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self, info_hash: Id20) -> usize {
        self.pending.iter().filter(|(_, h)| *h == info_hash).count()
    }

    #[cfg(test)]
    pub fn active_count(&self, info_hash: Id20) -> usize {
        self.active.keys().filter(|(_, h)| *h == info_hash).count()
    }

    #[cfg(test)]
    pub fn capacity(&self, info_hash: Id20) -> Option<usize> {
        self.capacity.get(&info_hash).copied()
    }

    #[cfg(test)]
    pub fn has_pending(&self, peer_id: Id20, info_hash: Id20) -> bool {
        self.pending.contains(&(peer_id, info_hash))
    }

    #[cfg(test)]
    pub fn has_active(&self, peer_id: Id20, info_hash: Id20) -> bool {
        self.active.contains_key(&(peer_id, info_hash))
    }

    #[cfg(test)]
    pub fn blacklisted(&self, peer_id: Id20, info_hash: Id20, now: Instant) -> bool {
        self.is_blacklisted(&(peer_id, info_hash), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 3;
    const BLACKLIST: Duration = Duration::from_secs(30);

    fn id(b: u8) -> Id20 {
        Id20::new([b; 20])
    }

    fn conn(peer: u8, hash: u8, now: Instant) -> Arc<Conn> {
        Arc::new(Conn::new(id(peer), id(hash), now))
    }

    fn state() -> (ConnState, Instant) {
        (ConnState::new(MAX, BLACKLIST), Instant::now())
    }

    fn check_capacity_invariant(s: &ConnState, h: Id20) {
        assert_eq!(
            s.pending_count(h) + s.active_count(h) + s.capacity(h).unwrap(),
            MAX
        );
    }

    #[test]
    fn test_add_pending_reserves_capacity() {
        let (mut s, now) = state();
        let h = id(0xaa);
        s.init_capacity(h);

        s.add_pending(id(1), h, now).unwrap();
        assert_eq!(s.capacity(h), Some(MAX - 1));
        check_capacity_invariant(&s, h);

        assert!(matches!(
            s.add_pending(id(1), h, now),
            Err(Error::DuplicatePendingConn)
        ));
        check_capacity_invariant(&s, h);
    }

    #[test]
    fn test_add_pending_at_capacity() {
        let (mut s, now) = state();
        let h = id(0xaa);
        s.init_capacity(h);

        for peer in 1..=MAX as u8 {
            s.add_pending(id(peer), h, now).unwrap();
        }
        assert!(matches!(
            s.add_pending(id(9), h, now),
            Err(Error::TorrentAtCapacity)
        ));

        // A pair-specific failure still reports as such, not as capacity.
        assert!(matches!(
            s.add_pending(id(1), h, now),
            Err(Error::DuplicatePendingConn)
        ));

        // Releasing one unit re-opens admission.
        s.delete_pending(id(1), h);
        s.add_pending(id(9), h, now).unwrap();
        check_capacity_invariant(&s, h);
    }

    #[test]
    fn test_move_pending_to_active() {
        let (mut s, now) = state();
        let h = id(0xaa);
        s.init_capacity(h);

        let c = conn(1, 0xaa, now);
        s.add_pending(id(1), h, now).unwrap();
        s.move_pending_to_active(c.clone()).unwrap();
        assert!(!s.has_pending(id(1), h));
        assert!(s.has_active(id(1), h));
        // Capacity unchanged by the move.
        assert_eq!(s.capacity(h), Some(MAX - 1));
        check_capacity_invariant(&s, h);

        assert!(matches!(
            s.add_pending(id(1), h, now),
            Err(Error::DuplicateActiveConn)
        ));

        s.delete_active(&c);
        assert_eq!(s.capacity(h), Some(MAX));
        check_capacity_invariant(&s, h);
    }

    #[test]
    fn test_move_without_pending_fails() {
        let (mut s, now) = state();
        s.init_capacity(id(0xaa));
        assert!(matches!(
            s.move_pending_to_active(conn(1, 0xaa, now)),
            Err(Error::PendingConnNotFound)
        ));
    }

    #[test]
    fn test_blacklist_bars_readmission_until_expiry() {
        let (mut s, now) = state();
        let h = id(0xaa);
        s.init_capacity(h);

        s.blacklist(id(1), h, now).unwrap();
        assert!(matches!(
            s.add_pending(id(1), h, now),
            Err(Error::ConnBlacklisted)
        ));

        // Expired entries no longer bar, even before cleanup runs.
        let later = now + BLACKLIST + Duration::from_secs(1);
        s.add_pending(id(1), h, later).unwrap();
    }

    #[test]
    fn test_blacklist_open_conn_is_a_bug() {
        let (mut s, now) = state();
        let h = id(0xaa);
        s.init_capacity(h);

        s.add_pending(id(1), h, now).unwrap();
        assert!(matches!(
            s.blacklist(id(1), h, now),
            Err(Error::BugConnStillOpen)
        ));

        let c = conn(1, 0xaa, now);
        s.move_pending_to_active(c.clone()).unwrap();
        assert!(matches!(
            s.blacklist(id(1), h, now),
            Err(Error::BugConnStillOpen)
        ));

        s.delete_active(&c);
        s.blacklist(id(1), h, now).unwrap();
    }

    #[test]
    fn test_delete_stale_blacklist_entries() {
        let (mut s, now) = state();
        let h = id(0xaa);
        s.blacklist(id(1), h, now).unwrap();
        s.blacklist(id(2), h, now + Duration::from_secs(10)).unwrap();

        s.delete_stale_blacklist_entries(now + BLACKLIST);
        assert!(!s.blacklisted(id(1), h, now));
        // Entry 2 expires 10s later and survives this sweep.
        assert!(s.blacklisted(id(2), h, now + Duration::from_secs(11)));
    }

    #[test]
    fn test_capacity_is_per_torrent() {
        let (mut s, now) = state();
        let (h1, h2) = (id(0xaa), id(0xbb));
        s.init_capacity(h1);
        s.init_capacity(h2);

        for peer in 1..=MAX as u8 {
            s.add_pending(id(peer), h1, now).unwrap();
        }
        // Same peers, other torrent: independent budget.
        for peer in 1..=MAX as u8 {
            s.add_pending(id(peer), h2, now).unwrap();
        }
        check_capacity_invariant(&s, h1);
        check_capacity_invariant(&s, h2);
    }

    #[test]
    fn test_randomized_ops_hold_capacity_invariant() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let (mut s, start) = state();
        let hashes = [id(0xaa), id(0xbb)];
        for h in hashes {
            s.init_capacity(h);
        }

        let mut now = start;
        for _ in 0..2000 {
            let peer = id(rng.gen_range(1..8u8));
            let h = hashes[rng.gen_range(0..hashes.len())];
            now += Duration::from_millis(rng.gen_range(0..1000));
            match rng.gen_range(0..6) {
                0 => {
                    let _ = s.add_pending(peer, h, now);
                }
                1 => s.delete_pending(peer, h),
                2 => {
                    let _ = s.move_pending_to_active(conn(peer.0[0], h.0[0], now));
                }
                3 => {
                    let c = Conn::new(peer, h, now);
                    s.delete_active(&c);
                }
                4 => {
                    let _ = s.blacklist(peer, h, now);
                }
                _ => s.delete_stale_blacklist_entries(now),
            }
            for h in hashes {
                check_capacity_invariant(&s, h);
                // Disjointness of pending and active.
                for peer in 1..8u8 {
                    assert!(!(s.has_pending(id(peer), h) && s.has_active(id(peer), h)));
                }
            }
        }
    }
}
