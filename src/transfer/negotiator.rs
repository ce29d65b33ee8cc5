use log::warn;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::core::events::{Notification, Notifier};

/// Outstanding outbound transfers keyed by destination address. A slot is
/// occupied from the moment an offer is issued until the streaming loop
/// ends, so at most one transfer per destination is ever in flight.
/// Release is idempotent; completion and the expiry guard can race safely.
#[derive(Default)]
pub struct PendingTransfers {
    slots: HashMap<SocketAddr, Slot>,
}

enum Slot {
    /// URQ sent, waiting for an ACP.
    Offered(PathBuf),
    /// ACP received, upload loop running.
    Streaming,
}

impl PendingTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an offer. Returns false when the destination slot is
    /// occupied, whether still offered or already streaming; the existing
    /// slot is left untouched.
    pub fn offer(&mut self, dest: SocketAddr, source: PathBuf) -> bool {
        if self.slots.contains_key(&dest) {
            return false;
        }
        self.slots.insert(dest, Slot::Offered(source));
        true
    }

    /// ACP arrived: mark the slot as streaming and hand back the source
    /// path. None when no offer is outstanding for `dest`.
    pub fn accept(&mut self, dest: &SocketAddr) -> Option<PathBuf> {
        if !matches!(self.slots.get(dest), Some(Slot::Offered(_))) {
            return None;
        }
        match self.slots.insert(*dest, Slot::Streaming) {
            Some(Slot::Offered(source)) => Some(source),
            _ => None,
        }
    }

    /// Release the slot once the streaming loop ends (or the offer is
    /// withdrawn before URQ went out). Idempotent.
    pub fn finish(&mut self, dest: &SocketAddr) {
        self.slots.remove(dest);
    }

    /// Reap an offer that was never accepted. A slot already streaming is
    /// not touched; its release belongs to the upload task.
    pub fn expire(&mut self, dest: &SocketAddr) -> bool {
        if matches!(self.slots.get(dest), Some(Slot::Offered(_))) {
            self.slots.remove(dest);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// One guard per offer: after `timeout` the slot is reclaimed if no ACP
/// consumed it, so an ignored offer cannot leak the destination forever.
/// An offer that moved to streaming in the meantime is left alone.
pub fn spawn_expiry_guard(
    pending: Arc<Mutex<PendingTransfers>>,
    dest: SocketAddr,
    timeout: Duration,
    notifier: Notifier,
    peer: String,
) {
    tokio::spawn(async move {
        sleep(timeout).await;
        if pending.lock().await.expire(&dest) {
            warn!("upload offer to {} expired without acceptance", peer);
            notifier.emit(Notification::TransferFailed {
                peer,
                reason: "offer timed out".to_string(),
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn second_offer_to_same_destination_is_rejected() {
        let mut pending = PendingTransfers::new();
        assert!(pending.offer(addr(6001), PathBuf::from("a.txt")));
        assert!(!pending.offer(addr(6001), PathBuf::from("b.txt")));
        // The original offer survives the rejected one.
        assert_eq!(pending.accept(&addr(6001)), Some(PathBuf::from("a.txt")));
    }

    #[test]
    fn distinct_destinations_do_not_conflict() {
        let mut pending = PendingTransfers::new();
        assert!(pending.offer(addr(6001), PathBuf::from("a.txt")));
        assert!(pending.offer(addr(6002), PathBuf::from("a.txt")));
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn slot_stays_occupied_while_streaming() {
        let mut pending = PendingTransfers::new();
        assert!(pending.offer(addr(6001), PathBuf::from("a.txt")));
        assert!(pending.accept(&addr(6001)).is_some());

        // Still busy until the streaming loop releases it.
        assert!(!pending.offer(addr(6001), PathBuf::from("b.txt")));

        pending.finish(&addr(6001));
        assert!(pending.offer(addr(6001), PathBuf::from("b.txt")));
    }

    #[test]
    fn accept_without_offer_is_none() {
        let mut pending = PendingTransfers::new();
        assert!(pending.accept(&addr(6001)).is_none());

        pending.offer(addr(6001), PathBuf::from("a.txt"));
        assert!(pending.accept(&addr(6001)).is_some());
        // A second ACP finds the slot streaming, not offered.
        assert!(pending.accept(&addr(6001)).is_none());
    }

    #[test]
    fn finish_is_idempotent() {
        let mut pending = PendingTransfers::new();
        pending.offer(addr(6001), PathBuf::from("a.txt"));
        pending.accept(&addr(6001));
        pending.finish(&addr(6001));
        pending.finish(&addr(6001));
        assert!(pending.is_empty());
    }

    #[test]
    fn expire_never_reaps_an_accepted_transfer() {
        let mut pending = PendingTransfers::new();
        pending.offer(addr(6001), PathBuf::from("a.txt"));
        pending.accept(&addr(6001));

        assert!(!pending.expire(&addr(6001)));
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn expiry_guard_reclaims_ignored_offers() {
        let pending = Arc::new(Mutex::new(PendingTransfers::new()));
        pending
            .lock()
            .await
            .offer(addr(6001), PathBuf::from("a.txt"));
        let (notifier, mut rx) = Notifier::channel();

        spawn_expiry_guard(
            pending.clone(),
            addr(6001),
            Duration::from_millis(20),
            notifier,
            "bob".to_string(),
        );

        let notification = rx.recv().await.unwrap();
        assert!(matches!(
            notification,
            Notification::TransferFailed { ref peer, .. } if peer == "bob"
        ));
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn expiry_guard_is_silent_after_acceptance() {
        let pending = Arc::new(Mutex::new(PendingTransfers::new()));
        pending
            .lock()
            .await
            .offer(addr(6001), PathBuf::from("a.txt"));
        let (notifier, mut rx) = Notifier::channel();

        spawn_expiry_guard(
            pending.clone(),
            addr(6001),
            Duration::from_millis(20),
            notifier,
            "bob".to_string(),
        );
        // Simulate the ACP path moving the slot to streaming first.
        pending.lock().await.accept(&addr(6001));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(pending.lock().await.len(), 1);
    }
}
