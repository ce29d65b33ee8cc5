use std::path::PathBuf;
use tokio::sync::mpsc;

/// Asynchronous notifications for the presentation shell. Delivered over an
/// unbounded channel so the engine never blocks on a slow or absent UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A chat line; `own` marks the local echo of our own message.
    Chat {
        from: String,
        text: String,
        own: bool,
    },
    /// A name appeared in the directory for the first time.
    PeerJoined { name: String },
    /// A peer departed or was evicted by the liveness reaper.
    PeerRemoved { name: String },
    /// A peer offers to send us a file; answer with `accept_download`.
    UploadOffer {
        peer: String,
        filename: String,
        size: u64,
    },
    /// An upload to this peer is already pending.
    DestinationBusy { peer: String },
    TransferComplete {
        peer: String,
        path: PathBuf,
        bytes: u64,
    },
    TransferFailed { peer: String, reason: String },
}

/// Sending half of the notification surface, cloned into every task that
/// can observe an event.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget; a dropped receiver just discards the event.
    pub fn emit(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}
