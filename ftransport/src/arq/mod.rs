//! Automatic-Repeat-reQuest engines.
//!
//! Two variants share one contract: Stop-and-Wait (window of one) and
//! Go-Back-N (fixed sender window). Each engine owns one peer link and
//! one static retransmission timeout; corrupt or unexpected frames are
//! dropped and covered by retransmission, never surfaced to callers.

mod endpoint;
mod gbn;
mod sw;

pub use gbn::GoBackN;
pub use sw::StopAndWait;

use crate::config::Config;
use crate::core::{Datagram, Version};
use crate::error::Result;
use crate::metrics::TransferMetrics;
use crate::transport::DatagramLink;

/// An ARQ engine, selected by the session's wire `version`.
pub enum Arq {
    Sw(StopAndWait),
    Gbn(GoBackN),
}

impl Arq {
    /// Builds the engine matching the peer's advertised protocol version.
    pub fn new(version: Version, link: DatagramLink, config: Config) -> Self {
        match version {
            Version::Sw => Arq::Sw(StopAndWait::new(link, config)),
            Version::Gbn => Arq::Gbn(GoBackN::new(link, config)),
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Arq::Sw(_) => Version::Sw,
            Arq::Gbn(_) => Version::Gbn,
        }
    }

    /// Time since the peer was last heard from; drivers abandon the
    /// session when this exceeds the configured inactivity budget.
    pub fn idle_for(&self) -> std::time::Duration {
        match self {
            Arq::Sw(engine) => engine.endpoint_ref().idle_for(),
            Arq::Gbn(engine) => engine.endpoint_ref().idle_for(),
        }
    }

    /// Transmits one DATA frame reliably.
    ///
    /// Stop-and-Wait returns once the frame is acknowledged; Go-Back-N
    /// returns once the frame is admitted into the window, blocking only
    /// while the window is full.
    pub async fn send_data(
        &mut self,
        datagram: Datagram,
        metrics: &mut TransferMetrics,
    ) -> Result<()> {
        match self {
            Arq::Sw(engine) => engine.send_data(datagram, metrics).await,
            Arq::Gbn(engine) => engine.send_data(datagram, metrics).await,
        }
    }

    /// Returns the next in-order DATA frame (acknowledging it), a control
    /// frame, or `None` on an RTO of silence. Duplicates are re-ACKed and
    /// swallowed.
    pub async fn receive_data(&mut self) -> Result<Option<Datagram>> {
        match self {
            Arq::Sw(engine) => engine.receive_data().await,
            Arq::Gbn(engine) => engine.receive_data().await,
        }
    }

    /// Sends a cumulative ACK for `acknum`.
    pub async fn send_ack(&mut self, acknum: u32) -> Result<()> {
        self.endpoint().send_ack(acknum).await
    }

    /// Waits up to one RTO for an ACK frame, returning its `acknum`.
    pub async fn receive_ack(&mut self) -> Result<Option<u32>> {
        match self {
            Arq::Sw(engine) => engine.receive_ack().await,
            Arq::Gbn(engine) => engine.receive_ack().await,
        }
    }

    pub async fn send_ok(&mut self) -> Result<()> {
        self.endpoint().send_ok().await
    }

    pub async fn send_err(&mut self, message: &str) -> Result<()> {
        self.endpoint().send_err(message).await
    }

    pub async fn send_bye(&mut self) -> Result<()> {
        self.endpoint().send_bye().await
    }

    /// Sender-side teardown: BYE until an OK arrives, then a quiet linger.
    ///
    /// Go-Back-N first drains its send window so teardown only starts once
    /// every DATA frame has been acknowledged.
    pub async fn send_bye_with_retry(
        &mut self,
        retries: u32,
        quiet_time: std::time::Duration,
        metrics: &mut TransferMetrics,
    ) -> Result<()> {
        match self {
            Arq::Sw(engine) => engine.endpoint_mut().send_bye_with_retry(retries, quiet_time).await,
            Arq::Gbn(engine) => {
                engine.flush(metrics).await?;
                engine.endpoint_mut().send_bye_with_retry(retries, quiet_time).await
            }
        }
    }

    /// Receiver-side teardown: wait for BYE, reply OK, and linger to
    /// absorb retransmitted BYEs.
    pub async fn await_bye_and_linger(
        &mut self,
        linger_factor: u32,
        quiet_time: std::time::Duration,
    ) -> Result<()> {
        self.endpoint()
            .await_bye_and_linger(linger_factor, quiet_time)
            .await
    }

    fn endpoint(&mut self) -> &mut endpoint::Endpoint {
        match self {
            Arq::Sw(engine) => engine.endpoint_mut(),
            Arq::Gbn(engine) => engine.endpoint_mut(),
        }
    }
}
