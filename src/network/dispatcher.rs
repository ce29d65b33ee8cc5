//! Per-datagram protocol state machine.
//!
//! One `Dispatcher` is owned by the receive loop; each datagram is decoded
//! and handled to completion before the next is read, so handler execution
//! never interleaves within a single peer. All failure paths end in a log
//! line, never a crash of the loop.

use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::config::Config;
use crate::core::directory::{PeerDirectory, PeerRecord};
use crate::core::events::{Notification, Notifier};
use crate::core::liveness::LivenessTable;
use crate::core::protocol::{self, Packet};
use crate::network::transport::Transport;
use crate::transfer::negotiator::PendingTransfers;
use crate::transfer::uploader;

pub struct Dispatcher {
    config: Config,
    transport: Arc<Transport>,
    directory: Arc<Mutex<PeerDirectory>>,
    liveness: Arc<Mutex<LivenessTable>>,
    pending: Arc<Mutex<PendingTransfers>>,
    notifier: Notifier,
}

impl Dispatcher {
    pub fn new(
        config: Config,
        transport: Arc<Transport>,
        directory: Arc<Mutex<PeerDirectory>>,
        liveness: Arc<Mutex<LivenessTable>>,
        pending: Arc<Mutex<PendingTransfers>>,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            transport,
            directory,
            liveness,
            pending,
            notifier,
        }
    }

    /// Decode and handle one datagram. Malformed or unknown input is
    /// dropped here with a log line and no state change.
    pub async fn dispatch(&self, datagram: &[u8], from: SocketAddr) {
        match protocol::decode(datagram) {
            Ok(packet) => self.handle(packet, from).await,
            Err(e) => debug!("dropping datagram from {}: {}", from, e),
        }
    }

    async fn handle(&self, packet: Packet, from: SocketAddr) {
        match packet {
            Packet::Announce(record) => self.on_announce(record, from).await,
            Packet::Chat(text) => self.on_chat(text, from).await,
            Packet::Bundle(records) => self.on_bundle(records, from).await,
            Packet::DirectoryRequest => self.on_directory_request(from).await,
            Packet::Depart => self.on_depart(from).await,
            Packet::Heartbeat => self.on_heartbeat(from).await,
            Packet::UploadOffer { filename, size } => {
                self.on_upload_offer(filename, size, from).await
            }
            Packet::UploadAccept { port } => self.on_upload_accept(port, from).await,
        }
    }

    /// CLI: upsert one announced record, substituting the observed source
    /// IP for a self-reported "localhost".
    async fn on_announce(&self, record: PeerRecord, from: SocketAddr) {
        let record = record.with_observed_ip(from);
        let name = record.name.clone();
        let newly_added = self.directory.lock().await.upsert(record);
        if newly_added {
            self.notifier.emit(Notification::PeerJoined { name });
        }
    }

    async fn on_chat(&self, text: String, from: SocketAddr) {
        let name = self.directory.lock().await.name_for(&from);
        debug!("new message received from {} ({})", name, from);
        self.notifier.emit(Notification::Chat {
            from: name,
            text,
            own: false,
        });
    }

    /// NCI: upsert every embedded record, then announce ourselves to each
    /// one. That reply is the anti-entropy step: a third party named in the
    /// bundle learns about us without ever having contacted us.
    async fn on_bundle(&self, records: Vec<PeerRecord>, from: SocketAddr) {
        let self_record = {
            let directory = self.directory.lock().await;
            directory.self_record().clone()
        };
        let announce = protocol::encode(&Packet::Announce(self_record.clone()));

        for record in records {
            let record = record.with_observed_ip(from);
            if record.name == self_record.name {
                continue;
            }
            let name = record.name.clone();
            let target = (record.ip.clone(), record.port);
            let newly_added = self.directory.lock().await.upsert(record);
            if newly_added {
                self.notifier.emit(Notification::PeerJoined { name });
            }
            if let Err(e) = self
                .transport
                .send(&announce, (target.0.as_str(), target.1))
                .await
            {
                warn!("failed to announce to {}:{}: {}", target.0, target.1, e);
            }
        }
    }

    /// CIN: reply with the whole directory, self included.
    async fn on_directory_request(&self, from: SocketAddr) {
        let records = self.directory.lock().await.all();
        info!("peer records sent to {}", from);
        let bundle = protocol::encode(&Packet::Bundle(records));
        if let Err(e) = self.transport.send_addr(&bundle, from).await {
            warn!("failed to send directory to {}: {}", from, e);
        }
    }

    /// DEL: drop the sender's record and liveness entry. A miss is a no-op.
    async fn on_depart(&self, from: SocketAddr) {
        // Lock order everywhere both are held: directory, then liveness.
        let mut directory = self.directory.lock().await;
        let mut liveness = self.liveness.lock().await;
        liveness.forget(&from);
        if let Some(record) = directory.remove_by_addr(&from) {
            info!("deleting {}", record.name);
            self.notifier
                .emit(Notification::PeerRemoved { name: record.name });
        } else {
            debug!("departure from unknown address {}", from);
        }
    }

    async fn on_heartbeat(&self, from: SocketAddr) {
        debug!("ping from {}", from);
        self.liveness.lock().await.refresh(from);
    }

    /// URQ: surface the offer; the shell answers with `accept_download`
    /// out of band.
    async fn on_upload_offer(&self, filename: String, size: u64, from: SocketAddr) {
        let peer = self.directory.lock().await.name_for(&from);
        info!("{} offers {} ({} bytes)", peer, filename, size);
        self.notifier.emit(Notification::UploadOffer {
            peer,
            filename,
            size,
        });
    }

    /// ACP: the destination accepted our pending offer and listens on
    /// `port`; stream the file from an independent task. The pending slot
    /// stays occupied until that task finishes, so the destination reads
    /// as busy for the whole transfer.
    async fn on_upload_accept(&self, port: u16, from: SocketAddr) {
        let source = self.pending.lock().await.accept(&from);
        let Some(source) = source else {
            warn!("ACP from {} with no pending offer", from);
            return;
        };

        let peer = self.directory.lock().await.name_for(&from);
        let target = SocketAddr::new(from.ip(), port);
        let chunk_size = self.config.chunk_size;
        let notifier = self.notifier.clone();
        let pending = self.pending.clone();

        tokio::spawn(async move {
            let result = uploader::upload(&source, target, chunk_size).await;
            pending.lock().await.finish(&from);
            match result {
                Ok(bytes) => {
                    info!("upload of {:?} to {} finished ({} bytes)", source, peer, bytes);
                    notifier.emit(Notification::TransferComplete {
                        peer,
                        path: source,
                        bytes,
                    });
                }
                Err(e) => {
                    warn!("upload of {:?} to {} failed: {}", source, peer, e);
                    notifier.emit(Notification::TransferFailed {
                        peer,
                        reason: e.to_string(),
                    });
                }
            }
        });
    }
}
