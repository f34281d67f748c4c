//! State and operations shared by both ARQ variants: the peer link, the
//! receiver's `expected_seq` cursor, control-frame sends, and the
//! BYE/linger teardown exchange.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::Config;
use crate::core::payload::{make_err, make_ok};
use crate::core::{Datagram, MsgType, Version};
use crate::error::{Error, Result};
use crate::transport::DatagramLink;

pub(crate) struct Endpoint {
    pub(crate) link: DatagramLink,
    pub(crate) config: Config,
    pub(crate) version: Version,

    /// Next sequence number the receive side will accept.
    pub(crate) expected_seq: u32,

    /// When the last datagram was heard from the peer, well-formed or
    /// not. Sessions are abandoned once this exceeds the inactivity
    /// budget.
    pub(crate) last_heard: Instant,
}

impl Endpoint {
    pub(crate) fn new(link: DatagramLink, config: Config, version: Version) -> Self {
        Self {
            link,
            config,
            version,
            expected_seq: 0,
            last_heard: Instant::now(),
        }
    }

    /// Time since the peer was last heard from.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_heard.elapsed()
    }

    /// Decodes a raw frame, swallowing transient codec failures.
    pub(crate) fn decode_lenient(&self, raw: &[u8]) -> Result<Option<Datagram>> {
        match Datagram::decode(raw) {
            Ok(datagram) => Ok(Some(datagram)),
            Err(e) if e.is_transient() => {
                debug!("dropping undecodable frame: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn send_ack(&mut self, acknum: u32) -> Result<()> {
        self.link
            .send_datagram(&Datagram::ack(self.version, acknum))
            .await
    }

    pub(crate) async fn send_ok(&mut self) -> Result<()> {
        self.link.send_datagram(&make_ok(self.version)).await
    }

    pub(crate) async fn send_err(&mut self, message: &str) -> Result<()> {
        self.link
            .send_datagram(&make_err(self.version, message))
            .await
    }

    pub(crate) async fn send_bye(&mut self) -> Result<()> {
        self.link.send_datagram(&Datagram::bye(self.version)).await
    }

    /// Shared receive path: waits one RTO for a frame. In-order DATA is
    /// acknowledged and returned; any other DATA is re-ACKed with the
    /// current cumulative position and swallowed; control frames surface
    /// to the caller untouched.
    pub(crate) async fn receive_data(&mut self) -> Result<Option<Datagram>> {
        let Some(raw) = self.link.recv(self.config.rto).await? else {
            return Ok(None);
        };
        self.last_heard = Instant::now();
        let Some(datagram) = self.decode_lenient(&raw)? else {
            return Ok(None);
        };

        if datagram.typ != MsgType::Data {
            return Ok(Some(datagram));
        }

        if datagram.seq == self.expected_seq {
            self.expected_seq += 1;
            self.send_ack(self.expected_seq).await?;
            Ok(Some(datagram))
        } else {
            debug!(
                "discarding DATA seq {} (expected {}), re-acking",
                datagram.seq, self.expected_seq
            );
            self.send_ack(self.expected_seq).await?;
            Ok(None)
        }
    }

    /// Waits up to one RTO for an ACK frame and returns its `acknum`.
    pub(crate) async fn receive_ack(&mut self) -> Result<Option<u32>> {
        let deadline = Instant::now() + self.config.rto;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let Some(raw) = self.link.recv(deadline - now).await? else {
                return Ok(None);
            };
            self.last_heard = Instant::now();
            if let Some(datagram) = self.decode_lenient(&raw)? {
                if datagram.typ == MsgType::Ack {
                    return Ok(Some(datagram.ack));
                }
            }
        }
    }

    /// Sender-side teardown.
    ///
    /// Sends BYE and waits one RTO for OK, retrying up to `retries`
    /// times. Once the OK arrives, lingers for `quiet_time` absorbing
    /// stray frames: only a quiet interval tells us the peer saw the OK
    /// exchange complete.
    pub(crate) async fn send_bye_with_retry(
        &mut self,
        retries: u32,
        quiet_time: Duration,
    ) -> Result<()> {
        let bye = Datagram::bye(self.version).encode()?;

        for attempt in 1..=retries {
            self.link.send(&bye).await?;

            let deadline = Instant::now() + self.config.rto;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let Some(raw) = self.link.recv(deadline - now).await? else {
                    break;
                };
                let Some(datagram) = self.decode_lenient(&raw)? else {
                    continue;
                };
                if datagram.typ == MsgType::Ok {
                    self.absorb_quiet(quiet_time).await?;
                    debug!("teardown complete after {attempt} BYE attempt(s)");
                    return Ok(());
                }
            }
        }

        warn!("no OK after {retries} BYE attempts, giving up");
        Err(Error::TeardownFailure(retries))
    }

    /// Receiver-side teardown.
    ///
    /// Blocks until a BYE arrives (re-ACKing any retransmitted DATA seen
    /// on the way, in case the final ACK was lost), replies OK, then
    /// lingers `linger_factor x RTO` answering duplicate BYEs. The wait
    /// is bounded by the session inactivity budget.
    pub(crate) async fn await_bye_and_linger(
        &mut self,
        linger_factor: u32,
        quiet_time: Duration,
    ) -> Result<()> {
        let mut idle = 0;
        loop {
            match self.link.recv(self.config.rto).await? {
                None => {
                    idle += 1;
                    if idle >= self.config.retry_max {
                        return Err(Error::Timeout);
                    }
                }
                Some(raw) => {
                    let Some(datagram) = self.decode_lenient(&raw)? else {
                        continue;
                    };
                    idle = 0;
                    match datagram.typ {
                        MsgType::Bye => break,
                        MsgType::Data => {
                            // The peer never saw our last ACK.
                            self.send_ack(self.expected_seq).await?;
                        }
                        _ => {}
                    }
                }
            }
        }

        self.send_ok().await?;
        let mut linger_end = Instant::now() + self.config.rto * linger_factor;
        loop {
            let now = Instant::now();
            if now >= linger_end {
                debug!("linger expired quietly, session closed");
                return Ok(());
            }
            let wait = quiet_time.min(linger_end - now);
            let Some(raw) = self.link.recv(wait).await? else {
                continue;
            };
            if let Some(datagram) = self.decode_lenient(&raw)? {
                if datagram.typ == MsgType::Bye {
                    debug!("duplicate BYE during linger, re-sending OK");
                    self.send_ok().await?;
                    linger_end = Instant::now() + self.config.rto * linger_factor;
                }
            }
        }
    }

    /// Absorbs and discards anything arriving within `quiet_time`.
    async fn absorb_quiet(&mut self, quiet_time: Duration) -> Result<()> {
        let end = Instant::now() + quiet_time;
        loop {
            let now = Instant::now();
            if now >= end {
                return Ok(());
            }
            match self.link.recv(end - now).await {
                Ok(_) => {}
                Err(Error::LinkClosed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}
