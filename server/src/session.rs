//! Per-peer session worker.
//!
//! Each worker owns one queue-fed ARQ engine, one file stream and its
//! metrics; there is no state shared between sessions. The worker
//! removes itself from the peer table on exit, so a later request from
//! the same address starts a fresh session.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use ftransport::core::payload::ControlPayload;
use ftransport::core::{Datagram, MsgType};
use ftransport::metrics::Direction;
use ftransport::{Arq, Config, DatagramLink, Error, FileStore, Result, TransferMetrics};

use crate::dispatch::PeerTable;

/// Entry point spawned by the dispatcher for each admitted peer.
pub(crate) async fn run(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    queue: mpsc::Receiver<Vec<u8>>,
    config: Config,
    storage: PathBuf,
    peers: PeerTable,
) {
    match drive(socket, peer, queue, &config, storage).await {
        Ok(()) => info!("session with {peer} finished"),
        Err(e) => warn!("session with {peer} failed: {e}"),
    }
    peers.lock().expect("peer table poisoned").remove(&peer);
}

/// Pops the initial request, chooses the direction, and runs the
/// transfer to completion.
async fn drive(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    queue: mpsc::Receiver<Vec<u8>>,
    config: &Config,
    storage: PathBuf,
) -> Result<()> {
    let mut link = DatagramLink::queued(socket, peer, queue);

    // The dispatcher pushed the request before spawning us.
    let raw = link.recv(config.rto).await?.ok_or(Error::Timeout)?;
    let request = Datagram::decode(&raw)?;
    let payload = ControlPayload::decode(&request.payload)?;
    let filename = payload.require_filename()?.to_string();

    let store = FileStore::open(storage)?;
    let mut arq = Arq::new(request.version, link, config.clone());

    match request.typ {
        MsgType::RequestUpload => handle_upload(&mut arq, store, &filename, config).await,
        MsgType::RequestDownload => handle_download(&mut arq, store, &filename, config).await,
        other => {
            arq.send_err(&format!("unexpected {other:?} before handshake"))
                .await?;
            Err(Error::InvalidField("request type"))
        }
    }
}

/// Receives DATA frames in order and appends them to the store until the
/// last fragment, then answers the client's BYE.
async fn handle_upload(
    arq: &mut Arq,
    mut store: FileStore,
    filename: &str,
    config: &Config,
) -> Result<()> {
    arq.send_ok().await?;
    let mut metrics = TransferMetrics::start(Direction::Upload, filename);

    let mut received_any = false;
    loop {
        match arq.receive_data().await? {
            None => {
                if arq.idle_for() >= config.inactivity_budget() {
                    store.close(filename)?;
                    return Err(Error::Timeout);
                }
            }
            Some(datagram) => {
                match datagram.typ {
                    MsgType::Data => {
                        received_any = true;
                        let more = datagram.more_fragments();
                        store.save_chunk(filename, &datagram.payload, more)?;
                        metrics.add_bytes(datagram.payload.len());
                        if !more {
                            break;
                        }
                    }
                    MsgType::RequestUpload if !received_any => {
                        // Our OK never made it; answer the retry.
                        arq.send_ok().await?;
                    }
                    MsgType::RequestUpload | MsgType::RequestDownload => {
                        warn!("REQUEST mid-session from peer, dropping");
                    }
                    MsgType::Bye => {
                        // The client gave up before the last fragment.
                        store.close(filename)?;
                        arq.send_ok().await?;
                        return Err(Error::Timeout);
                    }
                    _ => {}
                }
            }
        }
    }

    metrics.finish();
    if let Err(e) = arq
        .await_bye_and_linger(config.linger_factor, config.quiet_time)
        .await
    {
        warn!("upload of '{filename}' stored, but teardown was cut short: {e}");
    }
    Ok(())
}

/// Streams the stored file in MSS-sized fragments, then tears the
/// session down with BYE.
async fn handle_download(
    arq: &mut Arq,
    store: FileStore,
    filename: &str,
    config: &Config,
) -> Result<()> {
    let mut reader = store.reader(filename)?;
    arq.send_ok().await?;
    let mut metrics = TransferMetrics::start(Direction::Download, filename);

    let mut seq = 0;
    while let Some((chunk, more)) = reader.next_chunk()? {
        let n = chunk.len();
        let datagram = Datagram::data(arq.version(), seq, chunk, more);
        arq.send_data(datagram, &mut metrics).await?;
        metrics.add_bytes(n);
        seq += 1;
    }

    match arq
        .send_bye_with_retry(config.retry_max, config.quiet_time, &mut metrics)
        .await
    {
        Ok(()) => {}
        Err(Error::TeardownFailure(attempts)) => {
            // Every DATA frame was acknowledged before the first BYE, so
            // the transfer itself is complete.
            warn!("download of '{filename}' delivered, no OK after {attempts} BYEs");
        }
        Err(e) => return Err(e),
    }
    metrics.finish();
    Ok(())
}
