//! Client-side transfer driver.
//!
//! Opens one UDP socket per transfer (the stable source port is what
//! identifies the session to the server), performs the request/OK
//! handshake with a doubling timeout, then streams file content through
//! the negotiated ARQ engine.

use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::net::UdpSocket;

use ftransport::core::payload::{make_request_download, make_request_upload, ControlPayload};
use ftransport::core::{Datagram, MsgType, Version};
use ftransport::metrics::Direction;
use ftransport::storage::ChunkReader;
use ftransport::{Arq, Config, DatagramLink, Error, Result, TransferMetrics};

/// ARQ protocol selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum Protocol {
    /// Stop-and-Wait
    Sw,
    /// Go-Back-N
    Gbn,
}

impl From<Protocol> for Version {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Sw => Version::Sw,
            Protocol::Gbn => Version::Gbn,
        }
    }
}

/// Initialises env_logger honouring the shared verbosity flags.
pub fn init_logging(verbose: bool, quiet: bool) {
    let default_filter = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// Driver for one upload or download against a server endpoint.
pub struct TransferClient {
    server: SocketAddr,
    version: Version,
    config: Config,
}

impl TransferClient {
    pub fn new(server: SocketAddr, version: Version, config: Config) -> Self {
        Self {
            server,
            version,
            config,
        }
    }

    /// Uploads the file at `src`, stored remotely as `name`.
    pub async fn upload(&self, src: &Path, name: &str) -> Result<()> {
        if !src.is_file() {
            return Err(Error::FileNotFound(src.display().to_string()));
        }
        let mut reader = ChunkReader::open(src)?;
        let total = reader.remaining();

        let request = make_request_upload(self.version, name, total);
        let link = self.handshake(request).await?;
        let mut arq = Arq::new(self.version, link, self.config.clone());
        let mut metrics = TransferMetrics::start(Direction::Upload, name);

        let mut seq = 0;
        while let Some((chunk, more)) = reader.next_chunk()? {
            let n = chunk.len();
            let datagram = Datagram::data(self.version, seq, chunk, more);
            arq.send_data(datagram, &mut metrics).await?;
            metrics.add_bytes(n);
            seq += 1;
        }

        debug!("all {seq} fragments sent, closing session");
        match arq
            .send_bye_with_retry(self.config.retry_max, self.config.quiet_time, &mut metrics)
            .await
        {
            Ok(()) => {}
            Err(Error::TeardownFailure(attempts)) => {
                warn!("upload delivered, but no OK after {attempts} BYEs");
            }
            Err(e) => return Err(e),
        }
        metrics.finish();
        Ok(())
    }

    /// Downloads the remote file `name` into the local path `dst`.
    pub async fn download(&self, dst: &Path, name: &str) -> Result<()> {
        let request = make_request_download(self.version, name);
        let link = self.handshake(request).await?;
        let mut arq = Arq::new(self.version, link, self.config.clone());
        let mut metrics = TransferMetrics::start(Direction::Download, name);

        let mut file = File::create(dst)?;
        loop {
            match arq.receive_data().await? {
                None => {
                    if arq.idle_for() >= self.config.inactivity_budget() {
                        return Err(Error::Timeout);
                    }
                }
                Some(datagram) => {
                    match datagram.typ {
                        MsgType::Data => {
                            file.write_all(&datagram.payload)?;
                            metrics.add_bytes(datagram.payload.len());
                            if !datagram.more_fragments() {
                                break;
                            }
                        }
                        MsgType::Err => {
                            let payload = ControlPayload::decode(&datagram.payload)?;
                            return Err(Error::ServerError(
                                payload.message.unwrap_or_else(|| "server error".into()),
                            ));
                        }
                        _ => {}
                    }
                }
            }
        }
        file.flush()?;
        metrics.finish();

        if let Err(e) = arq
            .await_bye_and_linger(self.config.linger_factor, self.config.quiet_time)
            .await
        {
            warn!("download complete, but teardown was cut short: {e}");
        }
        Ok(())
    }

    /// Sends the request until the server answers, doubling the wait on
    /// every silent attempt. Learns the session peer address from the
    /// reply's source.
    async fn handshake(&self, request: Datagram) -> Result<DatagramLink> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let mut link = DatagramLink::direct(socket, self.server);
        let encoded = request.encode()?;
        debug!(
            "requesting session at {} (up to {} attempts within {:?})",
            self.server,
            self.config.retry_max,
            self.config.handshake_deadline()
        );

        let mut wait = self.config.rto;
        for attempt in 1..=self.config.retry_max {
            debug!("handshake attempt {attempt} (timeout {wait:?})");
            link.send(&encoded).await?;

            let deadline = Instant::now() + wait;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let Some((raw, from)) = link.recv_from(deadline - now).await? else {
                    break;
                };
                let reply = match Datagram::decode(&raw) {
                    Ok(d) => d,
                    Err(e) if e.is_transient() => continue,
                    Err(e) => return Err(e),
                };
                match reply.typ {
                    MsgType::Ok => {
                        info!("handshake accepted, session peer {from}");
                        link.set_peer(from);
                        return Ok(link);
                    }
                    MsgType::Data => {
                        // The OK was lost but the server is already
                        // streaming; the frame belongs to the data phase.
                        debug!("DATA in place of OK, treating handshake as accepted");
                        link.set_peer(from);
                        link.push_unread(raw);
                        return Ok(link);
                    }
                    MsgType::Err => {
                        let payload = ControlPayload::decode(&reply.payload)?;
                        return Err(Error::ServerError(
                            payload.message.unwrap_or_else(|| "server error".into()),
                        ));
                    }
                    _ => continue,
                }
            }
            wait *= 2;
        }

        Err(Error::HandshakeTimeout(self.config.retry_max))
    }
}
