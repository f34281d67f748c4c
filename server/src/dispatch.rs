//! Peer demultiplexer.
//!
//! UDP offers no connection demux, so the server owns one socket and one
//! receive loop. The first datagram from an unknown address is decoded
//! and validated here; requests that pass get a bounded queue and a
//! worker task, and every later datagram from that address is pushed
//! into the queue. A slow session can therefore never stall the
//! dispatcher, and rejected requests never cost a worker.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use ftransport::core::payload::{make_err, ControlPayload};
use ftransport::core::{Datagram, MsgType, Version};
use ftransport::{Config, FileStore, Result, MTU};

use crate::session;

/// Map from peer address to its session queue. Inserted into by the
/// dispatcher, removed from by each worker as it exits.
pub(crate) type PeerTable = Arc<Mutex<HashMap<SocketAddr, mpsc::Sender<Vec<u8>>>>>;

pub struct Server {
    socket: Arc<UdpSocket>,
    storage: PathBuf,
    config: Config,
    peers: PeerTable,
}

impl Server {
    /// Binds the well-known endpoint and prepares the storage directory.
    pub async fn bind(addr: SocketAddr, storage: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let storage = storage.into();
        FileStore::open(&storage)?;
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("server listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            storage,
            config,
            peers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The bound address, useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Number of sessions currently registered in the peer table.
    pub fn active_sessions(&self) -> usize {
        self.peers.lock().expect("peer table poisoned").len()
    }

    /// Runs the dispatch loop until the caller drops the future (the
    /// `start-server` binary selects against ctrl-c). Dropping it closes
    /// every queue, and workers terminate on their next receive.
    pub async fn run(&self) -> Result<()> {
        let mut buf = vec![0u8; MTU];
        loop {
            let (n, addr) = self.socket.recv_from(&mut buf).await?;
            let data = buf[..n].to_vec();

            let known = self
                .peers
                .lock()
                .expect("peer table poisoned")
                .contains_key(&addr);
            if known {
                self.forward(addr, data);
            } else {
                self.admit(addr, data).await?;
            }
        }
    }

    /// Pushes a datagram onto an existing session's queue.
    fn forward(&self, addr: SocketAddr, data: Vec<u8>) {
        let mut peers = self.peers.lock().expect("peer table poisoned");
        let Some(queue) = peers.get(&addr) else {
            // The worker exited between the lookup and now.
            return;
        };
        match queue.try_send(data) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("queue full for {addr}, dropping datagram");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("queue for {addr} closed, removing stale entry");
                peers.remove(&addr);
            }
        }
    }

    /// Decodes and validates the first datagram from a new address, and
    /// spawns a session worker when it is an acceptable request.
    async fn admit(&self, addr: SocketAddr, data: Vec<u8>) -> Result<()> {
        let datagram = match Datagram::decode(&data) {
            Ok(d) => d,
            Err(e) => {
                warn!("undecodable first datagram from {addr}: {e}");
                self.reject(addr, Version::Sw, "could not decode request")
                    .await?;
                return Ok(());
            }
        };

        match self.validate(&datagram) {
            Ok(filename) => {
                info!(
                    "{:?} for '{filename}' from {addr} ({:?})",
                    datagram.typ, datagram.version
                );
            }
            Err(message) => {
                info!("rejecting {addr}: {message}");
                self.reject(addr, datagram.version, &message).await?;
                return Ok(());
            }
        }

        let (tx, rx) = mpsc::channel(self.config.queue_depth);
        tx.try_send(data).expect("fresh queue cannot be full");
        self.peers
            .lock()
            .expect("peer table poisoned")
            .insert(addr, tx);

        let socket = Arc::clone(&self.socket);
        let peers = Arc::clone(&self.peers);
        let config = self.config.clone();
        let storage = self.storage.clone();
        tokio::spawn(session::run(socket, addr, rx, config, storage, peers));
        Ok(())
    }

    /// Checks a request against the store before any worker exists.
    /// Returns the filename, or the ERR message for the client.
    fn validate(&self, datagram: &Datagram) -> std::result::Result<String, String> {
        let payload = ControlPayload::decode(&datagram.payload)
            .map_err(|e| format!("malformed request payload: {e}"))?;

        match datagram.typ {
            MsgType::RequestUpload => {
                let filename = payload
                    .require_filename()
                    .map_err(|e| e.to_string())?
                    .to_string();
                let file_size = payload.require_file_size().map_err(|e| e.to_string())?;
                let store = FileStore::open(&self.storage).map_err(|e| e.to_string())?;
                store.validate_name(&filename).map_err(|e| e.to_string())?;
                if file_size > self.config.max_file_size {
                    return Err(format!(
                        "maximum file size exceeded ({} > {} bytes)",
                        file_size, self.config.max_file_size
                    ));
                }
                Ok(filename)
            }
            MsgType::RequestDownload => {
                let filename = payload
                    .require_filename()
                    .map_err(|e| e.to_string())?
                    .to_string();
                let store = FileStore::open(&self.storage).map_err(|e| e.to_string())?;
                if !store.contains(&filename) {
                    return Err(format!("file '{filename}' not found"));
                }
                Ok(filename)
            }
            other => Err(format!("unexpected {other:?} before handshake")),
        }
    }

    /// Sends ERR without allocating any session state.
    async fn reject(&self, addr: SocketAddr, version: Version, message: &str) -> Result<()> {
        let err = make_err(version, message).encode()?;
        self.socket.send_to(&err, addr).await?;
        Ok(())
    }
}

