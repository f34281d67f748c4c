//! Stop-and-Wait: one frame in flight, retransmitted until acknowledged.

use std::time::Instant;

use log::debug;

use crate::config::Config;
use crate::core::{Datagram, MsgType, Version};
use crate::error::{Error, Result};
use crate::metrics::TransferMetrics;
use crate::transport::DatagramLink;

use super::endpoint::Endpoint;

pub struct StopAndWait {
    endpoint: Endpoint,
}

impl StopAndWait {
    pub fn new(link: DatagramLink, config: Config) -> Self {
        Self {
            endpoint: Endpoint::new(link, config, Version::Sw),
        }
    }

    pub(crate) fn endpoint_ref(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn endpoint_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }

    /// Transmits one DATA frame and blocks until its ACK arrives.
    ///
    /// Each RTO expiry retransmits the frame; stale ACKs and foreign
    /// frames are ignored within the remaining budget. Gives up after
    /// `retry_max` consecutive silent RTOs.
    pub async fn send_data(
        &mut self,
        datagram: Datagram,
        metrics: &mut TransferMetrics,
    ) -> Result<()> {
        let encoded = datagram.encode()?;
        let want = datagram.seq + 1;

        for attempt in 0..self.endpoint.config.retry_max {
            if attempt > 0 {
                debug!("retransmitting DATA seq {}", datagram.seq);
                metrics.record_retransmission();
            }
            self.endpoint.link.send(&encoded).await?;
            let sent_at = Instant::now();
            let deadline = sent_at + self.endpoint.config.rto;

            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let Some(raw) = self.endpoint.link.recv(deadline - now).await? else {
                    break;
                };
                let Some(reply) = self.endpoint.decode_lenient(&raw)? else {
                    continue;
                };
                if reply.typ != MsgType::Ack {
                    continue;
                }
                if reply.ack == want {
                    metrics.record_rtt(sent_at.elapsed());
                    return Ok(());
                }
                // A duplicate of an earlier ACK; keep waiting.
                debug!("stale ACK {} while waiting for {want}", reply.ack);
            }
        }

        Err(Error::Timeout)
    }

    /// See [`Endpoint::receive_data`].
    pub async fn receive_data(&mut self) -> Result<Option<Datagram>> {
        self.endpoint.receive_data().await
    }

    pub async fn receive_ack(&mut self) -> Result<Option<u32>> {
        self.endpoint.receive_ack().await
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
    }

    async fn engine_pair() -> (StopAndWait, StopAndWait) {
        let a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let link_a = DatagramLink::direct(a.clone(), b.local_addr().unwrap());
        let link_b = DatagramLink::direct(b, a.local_addr().unwrap());
        (
            StopAndWait::new(link_a, test_config()),
            StopAndWait::new(link_b, test_config()),
        )
    }

    #[tokio::test]
    async fn test_in_order_delivery() {
        let (mut sender, mut receiver) = engine_pair().await;

        let chunks: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i; 40]).collect();
        let expected = chunks.clone();

        let recv_task = tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.len() < 3 {
                if let Some(d) = receiver.receive_data().await.unwrap() {
                    assert_eq!(d.typ, MsgType::Data);
                    seen.push(d.payload);
                }
            }
            seen
        });

        let mut metrics = TransferMetrics::start(Direction::Upload, "t");
        for (seq, chunk) in chunks.into_iter().enumerate() {
            let d = Datagram::data(Version::Sw, seq as u32, chunk, seq < 2);
            sender.send_data(d, &mut metrics).await.unwrap();
        }

        assert_eq!(recv_task.await.unwrap(), expected);
        assert_eq!(metrics.retransmissions(), 0);
    }

    #[tokio::test]
    async fn test_sender_times_out_without_peer() {
        let (mut sender, _receiver) = engine_pair().await;
        let mut metrics = TransferMetrics::start(Direction::Upload, "t");

        let d = Datagram::data(Version::Sw, 0, vec![1, 2, 3], false);
        let err = sender.send_data(d, &mut metrics).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        // One original send plus retry_max - 1 retransmissions.
        assert_eq!(metrics.retransmissions(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_data_is_reacked_not_delivered() {
        let (mut sender, mut receiver) = engine_pair().await;

        let recv_task = tokio::spawn(async move {
            let mut delivered = 0;
            for _ in 0..8 {
                match receiver.receive_data().await.unwrap() {
                    Some(d) if d.typ == MsgType::Data => delivered += 1,
                    _ => {}
                }
                if delivered == 2 {
                    break;
                }
            }
            delivered
        });

        let mut metrics = TransferMetrics::start(Direction::Upload, "t");
        sender
            .send_data(Datagram::data(Version::Sw, 0, vec![0xAA], true), &mut metrics)
            .await
            .unwrap();
        // Replay seq 0: the receiver must re-ACK and discard it.
        sender
            .endpoint
            .link
            .send(&Datagram::data(Version::Sw, 0, vec![0xAA], true).encode().unwrap())
            .await
            .unwrap();
        sender
            .send_data(Datagram::data(Version::Sw, 1, vec![0xBB], false), &mut metrics)
            .await
            .unwrap();

        assert_eq!(recv_task.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_teardown_exchange() {
        let (mut closer, mut peer) = engine_pair().await;

        let peer_task = tokio::spawn(async move {
            peer.endpoint
                .await_bye_and_linger(2, Duration::from_millis(20))
                .await
        });

        closer
            .endpoint
            .send_bye_with_retry(4, Duration::from_millis(20))
            .await
            .unwrap();
        peer_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (mut closer, mut peer) = engine_pair().await;

        let peer_task = tokio::spawn(async move {
            peer.endpoint
                .await_bye_and_linger(3, Duration::from_millis(20))
                .await
        });

        // A second teardown lands inside the peer's linger window and is
        // answered from there.
        for _ in 0..2 {
            closer
                .endpoint
                .send_bye_with_retry(4, Duration::from_millis(20))
                .await
                .unwrap();
        }
        peer_task.await.unwrap().unwrap();
    }
}
