//! Datagram link abstraction.
//!
//! An ARQ engine never touches a socket directly for receiving: it pulls
//! raw datagrams from a [`DatagramLink`], which either reads the UDP
//! socket itself (client side) or consumes a bounded queue filled by the
//! server's dispatcher. This is the sole concurrency seam between the
//! engines and the transport.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::MTU;
use crate::core::Datagram;
use crate::error::{Error, Result};

/// Where incoming datagrams for this session come from.
enum Feed {
    /// Read straight off the socket (client side).
    Socket,

    /// Datagrams are pushed by the server's dispatcher.
    Queue(mpsc::Receiver<Vec<u8>>),
}

/// One session's view of the transport: a shared UDP socket, the peer
/// address all sends go to, and the feed incoming datagrams arrive on.
pub struct DatagramLink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    feed: Feed,

    /// A datagram handed back by the handshake, delivered before the
    /// feed is consulted again.
    unread: Option<Vec<u8>>,
}

impl DatagramLink {
    /// Client-side link: receives directly from the socket.
    pub fn direct(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            feed: Feed::Socket,
            unread: None,
        }
    }

    /// Server-side link: receives from a dispatcher-fed queue.
    pub fn queued(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        queue: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            socket,
            peer,
            feed: Feed::Queue(queue),
            unread: None,
        }
    }

    /// Returns a consumed datagram so the next receive yields it again.
    ///
    /// The handshake uses this when a DATA frame arrives in place of the
    /// expected OK (the OK was lost but the server has entered the data
    /// phase): the frame belongs to the ARQ engine, not the handshake.
    pub fn push_unread(&mut self, data: Vec<u8>) {
        self.unread = Some(data);
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Repoints subsequent sends, used when the handshake reply reveals
    /// the session's remote address.
    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = peer;
    }

    /// Sends one raw frame to the peer.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        self.socket.send_to(frame, self.peer).await?;
        Ok(())
    }

    /// Encodes and sends one datagram to the peer.
    pub async fn send_datagram(&self, datagram: &Datagram) -> Result<()> {
        self.send(&datagram.encode()?).await
    }

    /// Waits up to `wait` for the next raw datagram.
    ///
    /// Returns `Ok(None)` on timeout and `Err(LinkClosed)` once the feed
    /// is gone (dispatcher shut down, queue dropped).
    pub async fn recv(&mut self, wait: Duration) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.unread.take() {
            return Ok(Some(data));
        }
        match &mut self.feed {
            Feed::Socket => {
                let mut buf = vec![0u8; MTU];
                match timeout(wait, self.socket.recv_from(&mut buf)).await {
                    Ok(Ok((n, _))) => {
                        buf.truncate(n);
                        Ok(Some(buf))
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Ok(None),
                }
            }
            Feed::Queue(rx) => match timeout(wait, rx.recv()).await {
                Ok(Some(data)) => Ok(Some(data)),
                Ok(None) => Err(Error::LinkClosed),
                Err(_) => Ok(None),
            },
        }
    }

    /// Like [`recv`](Self::recv) but also reports the datagram's source
    /// address; the handshake uses it to learn the session peer.
    pub async fn recv_from(&mut self, wait: Duration) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        if let Some(data) = self.unread.take() {
            return Ok(Some((data, self.peer)));
        }
        match &mut self.feed {
            Feed::Socket => {
                let mut buf = vec![0u8; MTU];
                match timeout(wait, self.socket.recv_from(&mut buf)).await {
                    Ok(Ok((n, addr))) => {
                        buf.truncate(n);
                        Ok(Some((buf, addr)))
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Ok(None),
                }
            }
            Feed::Queue(_) => {
                // Queue feeds are per-peer by construction.
                let peer = self.peer;
                Ok(self.recv(wait).await?.map(|data| (data, peer)))
            }
        }
    }

    /// Non-blocking poll for a pending datagram; the Go-Back-N sender
    /// drains acknowledgments with this between sends.
    pub fn try_recv(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.unread.take() {
            return Ok(Some(data));
        }
        match &mut self.feed {
            Feed::Socket => {
                let mut buf = vec![0u8; MTU];
                match self.socket.try_recv_from(&mut buf) {
                    Ok((n, _)) => {
                        buf.truncate(n);
                        Ok(Some(buf))
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            Feed::Queue(rx) => match rx.try_recv() {
                Ok(data) => Ok(Some(data)),
                Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => Err(Error::LinkClosed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MsgType, Version};

    async fn socket_pair() -> (Arc<UdpSocket>, Arc<UdpSocket>) {
        let a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        (a, b)
    }

    #[tokio::test]
    async fn test_direct_send_and_recv() {
        let (a, b) = socket_pair().await;
        let link_a = DatagramLink::direct(a.clone(), b.local_addr().unwrap());
        let mut link_b = DatagramLink::direct(b, a.local_addr().unwrap());

        let d = Datagram::bye(Version::Sw);
        link_a.send_datagram(&d).await.unwrap();

        let raw = link_b
            .recv(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("datagram");
        assert_eq!(Datagram::decode(&raw).unwrap().typ, MsgType::Bye);
    }

    #[tokio::test]
    async fn test_direct_recv_times_out() {
        let (a, b) = socket_pair().await;
        let mut link = DatagramLink::direct(a, b.local_addr().unwrap());
        let got = link.recv(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_queue_feed_delivers_and_closes() {
        let (a, b) = socket_pair().await;
        let (tx, rx) = mpsc::channel(4);
        let mut link = DatagramLink::queued(a, b.local_addr().unwrap(), rx);

        tx.send(vec![1, 2, 3]).await.unwrap();
        assert_eq!(
            link.recv(Duration::from_millis(100)).await.unwrap(),
            Some(vec![1, 2, 3])
        );

        drop(tx);
        assert!(matches!(
            link.recv(Duration::from_millis(100)).await,
            Err(Error::LinkClosed)
        ));
    }

    #[tokio::test]
    async fn test_try_recv_empty_queue() {
        let (a, b) = socket_pair().await;
        let (tx, rx) = mpsc::channel::<Vec<u8>>(4);
        let mut link = DatagramLink::queued(a, b.local_addr().unwrap(), rx);

        assert!(link.try_recv().unwrap().is_none());
        tx.try_send(vec![7]).unwrap();
        assert_eq!(link.try_recv().unwrap(), Some(vec![7]));
    }
}
