//! The peer engine facade.
//!
//! Composes the transport, dispatcher, liveness monitor and transfer
//! negotiator, and exposes the command surface the presentation shell
//! drives. All background work runs on spawned tasks that observe a stop
//! flag each loop iteration; `leave` broadcasts DEL and raises the flag.

use log::{debug, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{watch, Mutex};
use tokio::time::interval;

use crate::core::config::Config;
use crate::core::directory::{PeerDirectory, PeerRecord};
use crate::core::events::{Notification, Notifier};
use crate::core::liveness::LivenessTable;
use crate::core::protocol::{self, Packet, MAX_DATAGRAM};
use crate::network::{Dispatcher, Transport};
use crate::transfer::{downloader, negotiator, PendingTransfers};
use crate::utils::{ChatError, Result};

pub struct Engine {
    config: Config,
    transport: Arc<Transport>,
    directory: Arc<Mutex<PeerDirectory>>,
    liveness: Arc<Mutex<LivenessTable>>,
    pending: Arc<Mutex<PendingTransfers>>,
    notifier: Notifier,
    stop: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    /// Bind the control socket, seed the directory with the self-record
    /// and start the receive loop, heartbeat broadcaster and reaper.
    /// Returns the engine and the notification stream for the shell.
    pub async fn start(config: Config) -> Result<(Self, UnboundedReceiver<Notification>)> {
        let transport = Arc::new(Transport::bind(config.port).await?);
        let local = transport.local_addr()?;

        // We self-report as "localhost"; receivers substitute the source
        // address they observe.
        let self_record = PeerRecord::new(config.name.clone(), "localhost", local.port());
        let directory = Arc::new(Mutex::new(PeerDirectory::new(self_record)));
        let liveness = Arc::new(Mutex::new(LivenessTable::new()));
        let pending = Arc::new(Mutex::new(PendingTransfers::new()));
        let (notifier, notifications) = Notifier::channel();
        let (shutdown, _) = watch::channel(false);

        let engine = Self {
            config,
            transport,
            directory,
            liveness,
            pending,
            notifier,
            stop: Arc::new(AtomicBool::new(false)),
            shutdown,
        };

        engine.spawn_receive_loop();
        engine.spawn_heartbeat_broadcaster();
        engine.spawn_reaper();

        info!("engine started as {} on {}", engine.config.name, local);
        Ok((engine, notifications))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Snapshot of the directory, self-record included.
    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.directory.lock().await.all()
    }

    /// Join the network through one known address: a single CIN; the
    /// NCI reply and its anti-entropy fan-out do the rest.
    pub async fn connect(&self, ip: &str, port: u16) -> Result<()> {
        info!("connecting to ({}, {})", ip, port);
        self.transport
            .send(&protocol::encode(&Packet::DirectoryRequest), (ip, port))
            .await
    }

    /// Broadcast `text`, or send it only to the named peers. Our own name
    /// is always a local echo, never a network send.
    pub async fn send_message(&self, text: &str, targets: &[String]) -> Result<()> {
        let (self_name, others) = {
            let directory = self.directory.lock().await;
            (directory.self_name().to_string(), directory.others())
        };

        if targets.is_empty() || targets.iter().any(|t| *t == self_name) {
            self.notifier.emit(Notification::Chat {
                from: self_name,
                text: text.to_string(),
                own: true,
            });
        }

        let payload = protocol::encode(&Packet::Chat(text.to_string()));
        for record in others {
            if !targets.is_empty() && !targets.iter().any(|t| *t == record.name) {
                continue;
            }
            if let Err(e) = self.transport.send(&payload, record.target()).await {
                warn!("failed to send message to {}: {}", record.name, e);
            }
        }
        Ok(())
    }

    /// Offer `source` to `peer_name`. At most one outstanding offer per
    /// destination; a second one surfaces as DestinationBusy. An expiry
    /// guard reclaims the slot if no ACP arrives in time.
    pub async fn request_upload(&self, source: &Path, peer_name: &str) -> Result<()> {
        let record = self
            .directory
            .lock()
            .await
            .get(peer_name)
            .cloned()
            .ok_or_else(|| ChatError::UnknownPeer(peer_name.to_string()))?;

        let size = tokio::fs::metadata(source).await?.len();
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ChatError::Transfer("source path has no file name".to_string()))?
            .to_string();
        let dest = Transport::resolve(record.target()).await?;

        {
            let mut pending = self.pending.lock().await;
            if !pending.offer(dest, source.to_path_buf()) {
                warn!("upload to {} already pending", peer_name);
                self.notifier.emit(Notification::DestinationBusy {
                    peer: peer_name.to_string(),
                });
                return Ok(());
            }
        }

        info!("offering {} ({} bytes) to {}", filename, size, peer_name);
        let offer = protocol::encode(&Packet::UploadOffer { filename, size });
        if let Err(e) = self.transport.send(&offer, record.target()).await {
            // Give the slot back instead of leaving it to the expiry guard.
            self.pending.lock().await.finish(&dest);
            return Err(e);
        }

        negotiator::spawn_expiry_guard(
            self.pending.clone(),
            dest,
            self.config.offer_timeout,
            self.notifier.clone(),
            peer_name.to_string(),
        );
        Ok(())
    }

    /// Accept a previously surfaced upload offer: listen on an ephemeral
    /// port, tell the sender with ACP, and stream the payload into `dest`
    /// off the control channel.
    pub async fn accept_download(&self, dest: &Path, peer_name: &str) -> Result<()> {
        let record = self
            .directory
            .lock()
            .await
            .get(peer_name)
            .cloned()
            .ok_or_else(|| ChatError::UnknownPeer(peer_name.to_string()))?;

        let (listener, port) = downloader::bind_ephemeral().await?;
        info!("accepting upload from {} on port {}", peer_name, port);
        self.transport
            .send(
                &protocol::encode(&Packet::UploadAccept { port }),
                record.target(),
            )
            .await?;

        let dest = dest.to_path_buf();
        let peer = peer_name.to_string();
        let accept_timeout = self.config.accept_timeout;
        let chunk_size = self.config.chunk_size;
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            match downloader::download(listener, &dest, accept_timeout, chunk_size).await {
                Ok(bytes) => {
                    info!("download from {} finished ({} bytes)", peer, bytes);
                    notifier.emit(Notification::TransferComplete {
                        peer,
                        path: dest,
                        bytes,
                    });
                }
                Err(e) => {
                    warn!("download from {} failed: {}", peer, e);
                    notifier.emit(Notification::TransferFailed {
                        peer,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    /// Graceful departure: DEL to every known peer, then stop all
    /// background tasks. The shutdown signal interrupts the periodic
    /// loops mid-wait so they drop their transport handles promptly;
    /// nothing is killed mid-operation.
    pub async fn leave(&self) -> Result<()> {
        info!("delete me");
        let others = self.directory.lock().await.others();
        let payload = protocol::encode(&Packet::Depart);
        for record in others {
            if let Err(e) = self.transport.send(&payload, record.target()).await {
                warn!("failed to send departure to {}: {}", record.name, e);
            }
        }
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        Ok(())
    }

    fn spawn_receive_loop(&self) {
        let dispatcher = Dispatcher::new(
            self.config.clone(),
            self.transport.clone(),
            self.directory.clone(),
            self.liveness.clone(),
            self.pending.clone(),
            self.notifier.clone(),
        );
        let transport = self.transport.clone();
        let stop = self.stop.clone();
        let poll = self.config.poll_timeout;

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            while !stop.load(Ordering::SeqCst) {
                match transport.recv(&mut buf, poll).await {
                    Ok(Some((len, from))) => dispatcher.dispatch(&buf[..len], from).await,
                    Ok(None) => {}
                    Err(e) => {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        // Connection-reset style errors are transient on UDP.
                        warn!("receive error (continuing): {}", e);
                        tokio::time::sleep(poll).await;
                    }
                }
            }
            debug!("receive loop stopped");
        });
    }

    /// Every T, prove liveness to everyone we know.
    fn spawn_heartbeat_broadcaster(&self) {
        let directory = self.directory.clone();
        let transport = self.transport.clone();
        let stop = self.stop.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            let payload = protocol::encode(&Packet::Heartbeat);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let others = directory.lock().await.others();
                for record in others {
                    if let Err(e) = transport.send(&payload, record.target()).await {
                        debug!("heartbeat to {} failed: {}", record.name, e);
                    }
                }
            }
            debug!("heartbeat broadcaster stopped");
        });
    }

    /// Every T/2, treat addresses silent for more than T as an implicit
    /// departure. Silence, not an explicit DEL, is the failure signal.
    fn spawn_reaper(&self) {
        let directory = self.directory.clone();
        let liveness = self.liveness.clone();
        let notifier = self.notifier.clone();
        let stop = self.stop.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period = self.config.reaper_interval();
        let max_age = self.config.liveness_max_age();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                // Same lock order as the dispatcher: directory, liveness.
                let mut directory = directory.lock().await;
                let mut liveness = liveness.lock().await;
                for addr in liveness.evict_stale(max_age) {
                    if let Some(record) = directory.remove_by_addr(&addr) {
                        info!("peer {} timed out", record.name);
                        notifier.emit(Notification::PeerRemoved { name: record.name });
                    }
                }
            }
            debug!("reaper stopped");
        });
    }
}
