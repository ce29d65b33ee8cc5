//! Serverless LAN chat engine.
//!
//! Every instance is simultaneously a directory node, a message relay
//! target and a file-transfer endpoint: peers discover each other over a
//! UDP control channel, converge on a shared membership view through
//! anti-entropy re-announcement, detect departed peers with heartbeats,
//! and negotiate ad-hoc TCP streams for file transfers.

pub mod core;
pub mod network;
pub mod transfer;
pub mod utils;

pub use crate::core::{Config, Engine, Notification, PeerDirectory, PeerRecord};
pub use crate::utils::{ChatError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
