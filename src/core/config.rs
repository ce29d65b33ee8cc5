use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine parameters. The timing constants are deliberately configurable:
/// tests shrink them to milliseconds, real deployments keep the defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Display name announced to other peers. Also the identity key,
    /// so it must be unique on the network.
    pub name: String,
    /// UDP port to bind; 0 lets the OS pick one.
    pub port: u16,
    /// Heartbeat interval T. The reaper sweeps every T/2 and evicts
    /// peers silent for more than T, bounding staleness to 1.5 T.
    pub heartbeat_interval: Duration,
    /// How long an upload offer waits for an ACP before it is abandoned.
    pub offer_timeout: Duration,
    /// How long a download listener waits for the inbound connection.
    pub accept_timeout: Duration,
    /// Chunk size for the TCP streaming loops.
    pub chunk_size: usize,
    /// Poll timeout of the UDP receive loop; also the shutdown latency.
    pub poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "anonymous".to_string(),
            port: 6000,
            heartbeat_interval: Duration::from_secs(10),
            offer_timeout: Duration::from_secs(60),
            accept_timeout: Duration::from_secs(30),
            chunk_size: 64 * 1024,
            poll_timeout: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Eviction threshold for the liveness reaper.
    pub fn liveness_max_age(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Sweep period of the reaper task (T/2).
    pub fn reaper_interval(&self) -> Duration {
        self.heartbeat_interval / 2
    }
}
