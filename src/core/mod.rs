pub mod config;
pub mod directory;
pub mod engine;
pub mod events;
pub mod liveness;
pub mod protocol;

pub use config::Config;
pub use directory::{PeerDirectory, PeerRecord};
pub use engine::Engine;
pub use events::{Notification, Notifier};
pub use liveness::LivenessTable;
pub use protocol::{Packet, MAX_DATAGRAM};
