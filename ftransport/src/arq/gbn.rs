//! Go-Back-N: a fixed window of in-flight frames, one timer on the
//! window base, full-window retransmission on expiry.

use std::time::Instant;

use log::debug;

use crate::buffer::SendWindow;
use crate::config::Config;
use crate::core::{Datagram, MsgType, Version};
use crate::error::{Error, Result};
use crate::metrics::TransferMetrics;
use crate::transport::DatagramLink;

use super::endpoint::Endpoint;

pub struct GoBackN {
    endpoint: Endpoint,
    window: SendWindow,

    /// Running while at least one frame is in flight; reset whenever the
    /// window base moves or the whole window is retransmitted.
    timer: Option<Instant>,
}

impl GoBackN {
    pub fn new(link: DatagramLink, config: Config) -> Self {
        let window = SendWindow::new(config.window);
        Self {
            endpoint: Endpoint::new(link, config, Version::Gbn),
            window,
            timer: None,
        }
    }

    pub(crate) fn endpoint_ref(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn endpoint_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }

    /// Transmits one DATA frame, returning once it is admitted into the
    /// window. Blocks only while the window is full, driving the timer
    /// and the ACK drain meanwhile. Gives up after an inactivity budget
    /// of stalled waiting.
    pub async fn send_data(
        &mut self,
        datagram: Datagram,
        metrics: &mut TransferMetrics,
    ) -> Result<()> {
        let encoded = datagram.encode()?;
        let mut last_progress = Instant::now();

        loop {
            self.retransmit_on_timeout(metrics).await?;
            if self.drain_acks()? > 0 {
                last_progress = Instant::now();
            }

            if self.window.can_send() {
                self.endpoint.link.send(&encoded).await?;
                if self.window.is_empty() {
                    self.timer = Some(Instant::now());
                }
                let seq = self.window.mark_sent(encoded);
                debug_assert_eq!(seq, datagram.seq);
                return Ok(());
            }

            if last_progress.elapsed() > self.endpoint.config.inactivity_budget() {
                return Err(Error::Timeout);
            }
            self.wait_for_ack_or_deadline().await?;
        }
    }

    /// Drives retransmission until every in-flight frame is acknowledged.
    ///
    /// Called before teardown so BYE never overtakes unacknowledged DATA.
    pub async fn flush(&mut self, metrics: &mut TransferMetrics) -> Result<()> {
        let mut last_progress = Instant::now();

        while !self.window.is_empty() {
            self.retransmit_on_timeout(metrics).await?;
            if self.drain_acks()? > 0 {
                last_progress = Instant::now();
            }
            if self.window.is_empty() {
                break;
            }
            if last_progress.elapsed() > self.endpoint.config.inactivity_budget() {
                return Err(Error::Timeout);
            }
            self.wait_for_ack_or_deadline().await?;
        }
        Ok(())
    }

    /// See [`Endpoint::receive_data`].
    pub async fn receive_data(&mut self) -> Result<Option<Datagram>> {
        self.endpoint.receive_data().await
    }

    /// Waits up to one RTO for an ACK and applies it to the window.
    pub async fn receive_ack(&mut self) -> Result<Option<u32>> {
        match self.endpoint.receive_ack().await? {
            Some(acknum) => {
                self.apply_ack(acknum);
                Ok(Some(acknum))
            }
            None => Ok(None),
        }
    }

    /// Retransmits the whole window when the timer has expired.
    async fn retransmit_on_timeout(&mut self, metrics: &mut TransferMetrics) -> Result<()> {
        let Some(started) = self.timer else {
            return Ok(());
        };
        if started.elapsed() <= self.endpoint.config.rto {
            return Ok(());
        }

        debug!(
            "timeout, retransmitting window [{}, {})",
            self.window.base(),
            self.window.next_seq()
        );
        for seq in self.window.in_flight() {
            if let Some(frame) = self.window.get(seq) {
                self.endpoint.link.send(frame).await?;
                metrics.record_retransmission();
            }
        }
        self.timer = Some(Instant::now());
        Ok(())
    }

    /// Consumes every pending datagram without blocking, applying
    /// cumulative ACKs. Returns how many frames were acknowledged.
    fn drain_acks(&mut self) -> Result<u32> {
        let mut acked = 0;
        while let Some(raw) = self.endpoint.link.try_recv()? {
            let Some(datagram) = self.endpoint.decode_lenient(&raw)? else {
                continue;
            };
            if datagram.typ == MsgType::Ack {
                acked += self.apply_ack(datagram.ack);
            }
        }
        Ok(acked)
    }

    /// Applies one cumulative ACK and manages the timer: stopped when the
    /// window empties, restarted otherwise.
    fn apply_ack(&mut self, acknum: u32) -> u32 {
        let advanced = self.window.mark_received(acknum);
        if advanced > 0 {
            if self.window.is_empty() {
                self.timer = None;
            } else {
                self.timer = Some(Instant::now());
            }
        }
        advanced
    }

    /// Blocks until a datagram arrives or the retransmission deadline
    /// passes, whichever is first.
    async fn wait_for_ack_or_deadline(&mut self) -> Result<()> {
        let wait = match self.timer {
            Some(started) => {
                let elapsed = started.elapsed();
                if elapsed >= self.endpoint.config.rto {
                    return Ok(());
                }
                self.endpoint.config.rto - elapsed
            }
            None => self.endpoint.config.rto,
        };

        if let Some(raw) = self.endpoint.link.recv(wait).await? {
            let Some(datagram) = self.endpoint.decode_lenient(&raw)? else {
                return Ok(());
            };
            if datagram.typ == MsgType::Ack {
                self.apply_ack(datagram.ack);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Direction, TransferMetrics};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    fn test_config() -> Config {
        Config::new()
            .with_rto(Duration::from_millis(100))
            .with_retry_max(4)
            .with_window(4)
    }

    async fn engine_pair() -> (GoBackN, GoBackN) {
        let a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let link_a = DatagramLink::direct(a.clone(), b.local_addr().unwrap());
        let link_b = DatagramLink::direct(b, a.local_addr().unwrap());
        (
            GoBackN::new(link_a, test_config()),
            GoBackN::new(link_b, test_config()),
        )
    }

    #[tokio::test]
    async fn test_pipelined_in_order_delivery() {
        let (mut sender, mut receiver) = engine_pair().await;

        let recv_task = tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.len() < 10 {
                if let Some(d) = receiver.receive_data().await.unwrap() {
                    seen.push(d.payload[0]);
                }
            }
            seen
        });

        let mut metrics = TransferMetrics::start(Direction::Upload, "t");
        for seq in 0..10u32 {
            let d = Datagram::data(Version::Gbn, seq, vec![seq as u8; 16], seq < 9);
            sender.send_data(d, &mut metrics).await.unwrap();
        }
        sender.flush(&mut metrics).await.unwrap();

        assert_eq!(recv_task.await.unwrap(), (0..10u8).collect::<Vec<_>>());
        assert!(sender.window.is_empty());
        assert!(sender.timer.is_none());
    }

    #[tokio::test]
    async fn test_window_admission_blocks_at_capacity() {
        let (mut sender, _receiver) = engine_pair().await;
        let mut metrics = TransferMetrics::start(Direction::Upload, "t");

        // With nobody acknowledging, exactly `window` frames are admitted
        // and the next send stalls until the budget runs out.
        for seq in 0..4u32 {
            sender
                .send_data(Datagram::data(Version::Gbn, seq, vec![0; 8], true), &mut metrics)
                .await
                .unwrap();
        }
        assert!(!sender.window.can_send());

        let err = sender
            .send_data(Datagram::data(Version::Gbn, 4, vec![0; 8], true), &mut metrics)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        // The stalled window kept being retransmitted while waiting.
        assert!(metrics.retransmissions() > 0);
    }

    #[tokio::test]
    async fn test_cumulative_ack_frees_window() {
        let (mut sender, receiver) = engine_pair().await;
        let mut metrics = TransferMetrics::start(Direction::Upload, "t");

        for seq in 0..4u32 {
            sender
                .send_data(Datagram::data(Version::Gbn, seq, vec![0; 8], true), &mut metrics)
                .await
                .unwrap();
        }

        // One cumulative ACK for everything sent so far.
        receiver
            .endpoint
            .link
            .send(&Datagram::ack(Version::Gbn, 4).encode().unwrap())
            .await
            .unwrap();

        sender.flush(&mut metrics).await.unwrap();
        assert!(sender.window.is_empty());
        assert_eq!(sender.window.base(), 4);
    }
}
