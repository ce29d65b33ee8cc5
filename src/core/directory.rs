use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// Name shown for messages from addresses the directory does not know.
pub const UNKNOWN_PEER: &str = "unknown";

/// One known peer. `name` is the identity key: a re-announcement with the
/// same name replaces the stored ip/port. Renaming is unsupported; a peer
/// that comes back under a new name counts as a new peer until the old
/// record times out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub name: String,
    pub ip: String,
    pub port: u16,
}

impl PeerRecord {
    pub fn new(name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            port,
        }
    }

    /// Wire form: compact JSON, round-trip exact.
    pub fn to_json(&self) -> String {
        // Serializing a three-field struct of plain types cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Peers behind loopback self-report as "localhost"; the receiving side
    /// must substitute the source address it actually observed.
    pub fn with_observed_ip(mut self, from: SocketAddr) -> Self {
        if self.ip == "localhost" {
            self.ip = from.ip().to_string();
        }
        self
    }

    /// UDP send target for this peer.
    pub fn target(&self) -> (&str, u16) {
        (self.ip.as_str(), self.port)
    }

    fn matches_addr(&self, addr: &SocketAddr) -> bool {
        self.port == addr.port() && self.ip == addr.ip().to_string()
    }
}

/// The local membership view, keyed by peer name. Always contains the
/// self-record; it can never be removed or overwritten by the network.
pub struct PeerDirectory {
    peers: HashMap<String, PeerRecord>,
    self_name: String,
}

impl PeerDirectory {
    pub fn new(self_record: PeerRecord) -> Self {
        let self_name = self_record.name.clone();
        let mut peers = HashMap::new();
        peers.insert(self_name.clone(), self_record);
        Self { peers, self_name }
    }

    pub fn self_record(&self) -> &PeerRecord {
        &self.peers[&self.self_name]
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    /// Insert or replace by name. Returns true when the name was new.
    /// A record claiming our own name is ignored.
    pub fn upsert(&mut self, record: PeerRecord) -> bool {
        if record.name == self.self_name {
            warn!("ignoring announcement that claims our own name");
            return false;
        }
        let name = record.name.clone();
        match self.peers.insert(name.clone(), record) {
            None => {
                info!("new peer record added: {}", name);
                true
            }
            Some(old) => {
                debug!("peer record refreshed: {}", old.name);
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&PeerRecord> {
        self.peers.get(name)
    }

    /// Address lookup. Exact ip:port equality first; a record announced
    /// under a hostname never string-matches a literal source IP, so those
    /// fall back to port-only matching. The self-record is excluded from
    /// the fallback, its stored "localhost" would otherwise shadow any
    /// remote peer sharing our port number.
    pub fn find_by_addr(&self, addr: &SocketAddr) -> Option<&PeerRecord> {
        self.peers
            .values()
            .find(|r| r.matches_addr(addr))
            .or_else(|| {
                self.peers.values().find(|r| {
                    r.name != self.self_name
                        && r.port == addr.port()
                        && r.ip.parse::<IpAddr>().is_err()
                })
            })
    }

    /// Resolve an address to a display name, "unknown" when absent.
    pub fn name_for(&self, addr: &SocketAddr) -> String {
        self.find_by_addr(addr)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| UNKNOWN_PEER.to_string())
    }

    /// Remove the peer reachable at `addr`. A miss is a no-op; the
    /// self-record never matches (its stored ip stays "localhost").
    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<PeerRecord> {
        let name = self.find_by_addr(addr)?.name.clone();
        if name == self.self_name {
            return None;
        }
        self.peers.remove(&name)
    }

    /// Snapshot of every record, self included (CIN replies).
    pub fn all(&self) -> Vec<PeerRecord> {
        self.peers.values().cloned().collect()
    }

    /// Snapshot of every record except self (fan-out targets).
    pub fn others(&self) -> Vec<PeerRecord> {
        self.peers
            .values()
            .filter(|r| r.name != self.self_name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str, port: u16) -> SocketAddr {
        format!("{}:{}", ip, port).parse().unwrap()
    }

    fn directory() -> PeerDirectory {
        PeerDirectory::new(PeerRecord::new("gall", "localhost", 6008))
    }

    #[test]
    fn self_record_is_always_present() {
        let dir = directory();
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.self_record().name, "gall");
    }

    #[test]
    fn upsert_replaces_same_name() {
        let mut dir = directory();
        assert!(dir.upsert(PeerRecord::new("bob", "10.0.0.2", 6504)));
        assert!(!dir.upsert(PeerRecord::new("bob", "10.0.0.9", 7000)));
        assert_eq!(dir.len(), 2);
        let bob = dir.get("bob").unwrap();
        assert_eq!(bob.ip, "10.0.0.9");
        assert_eq!(bob.port, 7000);
    }

    #[test]
    fn upsert_cannot_claim_self_name() {
        let mut dir = directory();
        assert!(!dir.upsert(PeerRecord::new("gall", "10.0.0.2", 9999)));
        assert_eq!(dir.self_record().ip, "localhost");
    }

    #[test]
    fn localhost_is_substituted_with_observed_ip() {
        let record = PeerRecord::new("name", "localhost", 6504)
            .with_observed_ip(addr("192.168.1.7", 40000));
        assert_eq!(record.ip, "192.168.1.7");
        assert_eq!(record.port, 6504);

        let record =
            PeerRecord::new("name", "10.0.0.5", 6504).with_observed_ip(addr("192.168.1.7", 40000));
        assert_eq!(record.ip, "10.0.0.5");
    }

    #[test]
    fn remove_by_addr_miss_is_noop() {
        let mut dir = directory();
        assert!(dir.remove_by_addr(&addr("10.0.0.2", 6504)).is_none());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn remove_by_addr_hits_matching_record() {
        let mut dir = directory();
        dir.upsert(PeerRecord::new("bob", "10.0.0.2", 6504));
        let removed = dir.remove_by_addr(&addr("10.0.0.2", 6504)).unwrap();
        assert_eq!(removed.name, "bob");
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn unknown_address_resolves_to_placeholder_name() {
        let dir = directory();
        assert_eq!(dir.name_for(&addr("10.9.9.9", 1)), UNKNOWN_PEER);
    }

    #[test]
    fn hostname_record_matches_by_port_alone() {
        let mut dir = directory();
        dir.upsert(PeerRecord::new("bob", "bobs-laptop.local", 6504));

        assert_eq!(dir.name_for(&addr("10.0.0.2", 6504)), "bob");
        let removed = dir.remove_by_addr(&addr("10.0.0.2", 6504)).unwrap();
        assert_eq!(removed.name, "bob");
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn literal_ip_record_wins_over_hostname_on_shared_port() {
        let mut dir = directory();
        dir.upsert(PeerRecord::new("alice", "10.0.0.2", 6504));
        dir.upsert(PeerRecord::new("bob", "bobs-laptop.local", 6504));

        assert_eq!(dir.name_for(&addr("10.0.0.2", 6504)), "alice");
    }

    #[test]
    fn port_fallback_never_resolves_to_self() {
        // Self is stored as "localhost", which is not an IP literal either.
        let dir = directory();
        assert_eq!(dir.name_for(&addr("10.0.0.2", 6008)), UNKNOWN_PEER);
    }
}
