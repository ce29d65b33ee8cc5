use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Last-heartbeat timestamps keyed by peer address. Entries appear when a
/// peer first sends PNG and disappear on eviction or explicit departure;
/// the table is independent of the directory.
#[derive(Default)]
pub struct LivenessTable {
    last_seen: HashMap<SocketAddr, Instant>,
}

impl LivenessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&mut self, addr: SocketAddr) {
        self.last_seen.insert(addr, Instant::now());
    }

    pub fn forget(&mut self, addr: &SocketAddr) {
        self.last_seen.remove(addr);
    }

    /// Remove and return every address silent for longer than `max_age`.
    pub fn evict_stale(&mut self, max_age: Duration) -> Vec<SocketAddr> {
        let now = Instant::now();
        let stale: Vec<SocketAddr> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > max_age)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &stale {
            self.last_seen.remove(addr);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn refresh_keeps_entry_fresh() {
        let mut table = LivenessTable::new();
        table.refresh(addr(6001));
        assert!(table.evict_stale(Duration::from_secs(60)).is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn silent_entries_are_evicted_once() {
        let mut table = LivenessTable::new();
        table.refresh(addr(6001));
        table.refresh(addr(6002));
        std::thread::sleep(Duration::from_millis(10));
        table.refresh(addr(6002));

        let stale = table.evict_stale(Duration::from_millis(5));
        assert_eq!(stale, vec![addr(6001)]);
        assert_eq!(table.len(), 1);
        // A second sweep finds nothing; eviction is not repeated.
        assert!(table.evict_stale(Duration::from_millis(5)).is_empty());
    }

    #[test]
    fn forget_is_idempotent() {
        let mut table = LivenessTable::new();
        table.refresh(addr(6001));
        table.forget(&addr(6001));
        table.forget(&addr(6001));
        assert!(table.is_empty());
    }
}
