//! Datagram definition and serialization.
//!
//! A datagram is the single frame type on the wire. Control messages
//! (REQUEST_*, OK, ERR) carry `key=value` payloads, DATA carries raw file
//! bytes, ACK and BYE are header-only.
//!
//! # Wire format
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |    Version    |            Flags              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            Length             |           Checksum            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Acknowledgment Number                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Payload...                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All fields big-endian. The checksum is the Internet checksum over the
//! header (checksum field zeroed) plus the payload.

use super::checksum;
use crate::config::{HEADER_SIZE, MSS};
use crate::error::{Error, Result};

/// Message type carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Client asks to store a file on the server.
    RequestUpload = 0,

    /// Client asks to fetch a file from the server.
    RequestDownload = 1,

    /// Positive reply: handshake accepted, or BYE acknowledged.
    Ok = 2,

    /// Negative reply carrying a `message` field.
    Err = 3,

    /// A file fragment.
    Data = 4,

    /// Cumulative acknowledgment; `acknum` is the next expected sequence.
    Ack = 5,

    /// Teardown request.
    Bye = 6,
}

impl MsgType {
    /// Converts a wire byte to a MsgType. Unknown codes are rejected.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::RequestUpload),
            1 => Some(Self::RequestDownload),
            2 => Some(Self::Ok),
            3 => Some(Self::Err),
            4 => Some(Self::Data),
            5 => Some(Self::Ack),
            6 => Some(Self::Bye),
            _ => None,
        }
    }

    /// True for the message types whose payload is `key=value` text.
    ///
    /// DATA payloads are raw file bytes and bypass the control codec.
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            Self::RequestUpload | Self::RequestDownload | Self::Ok | Self::Err
        )
    }
}

/// ARQ protocol version carried in the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Version {
    /// Stop-and-Wait, window of one.
    Sw = 1,

    /// Go-Back-N with a fixed sender window.
    Gbn = 2,
}

impl Version {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Sw),
            2 => Some(Self::Gbn),
            _ => None,
        }
    }
}

/// Header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u16);

impl Flags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// The `acknum` field is meaningful.
    pub const ACK_VALID: Self = Self(1 << 15);

    /// Further fragments of this transfer follow.
    pub const MORE_FRAGMENTS: Self = Self(1 << 14);

    /// Mask of the bits this implementation understands. Reserved bits
    /// are zeroed on send and ignored on receive.
    const KNOWN: u16 = Self::ACK_VALID.0 | Self::MORE_FRAGMENTS.0;

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    const fn masked(self) -> Self {
        Self(self.0 & Self::KNOWN)
    }
}

/// A single frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Message type.
    pub typ: MsgType,

    /// ARQ protocol version of the session.
    pub version: Version,

    /// Header flags. ACK-valid is set automatically at encode time.
    pub flags: Flags,

    /// Acknowledgment number (next expected sequence).
    pub ack: u32,

    /// Sequence number.
    pub seq: u32,

    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Datagram {
    /// Creates a DATA frame for one file fragment.
    ///
    /// `more_fragments` must be true on every fragment but the last.
    pub fn data(version: Version, seq: u32, chunk: Vec<u8>, more_fragments: bool) -> Self {
        let mut flags = Flags::NONE;
        if more_fragments {
            flags.insert(Flags::MORE_FRAGMENTS);
        }
        Self {
            typ: MsgType::Data,
            version,
            flags,
            ack: 0,
            seq,
            payload: chunk,
        }
    }

    /// Creates a cumulative ACK frame.
    pub fn ack(version: Version, acknum: u32) -> Self {
        Self {
            typ: MsgType::Ack,
            version,
            flags: Flags::NONE,
            ack: acknum,
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// Creates a BYE frame.
    pub fn bye(version: Version) -> Self {
        Self {
            typ: MsgType::Bye,
            version,
            flags: Flags::NONE,
            ack: 0,
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// Creates a control frame with an already-encoded payload.
    pub fn control(typ: MsgType, version: Version, payload: Vec<u8>) -> Self {
        debug_assert!(typ.is_control());
        Self {
            typ,
            version,
            flags: Flags::NONE,
            ack: 0,
            seq: 0,
            payload,
        }
    }

    /// True when further fragments of the transfer follow this one.
    pub fn more_fragments(&self) -> bool {
        self.flags.contains(Flags::MORE_FRAGMENTS)
    }

    /// Serializes the datagram, computing the checksum and setting the
    /// automatic flags.
    ///
    /// Fails with `FrameTooBig` when the payload exceeds MSS.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MSS {
            return Err(Error::FrameTooBig(self.payload.len()));
        }

        let mut flags = self.flags.masked();
        if self.typ == MsgType::Ack || self.ack != 0 {
            flags.insert(Flags::ACK_VALID);
        }

        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.push(self.typ as u8);
        buf.push(self.version as u8);
        buf.extend_from_slice(&flags.bits().to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&self.ack.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let ck = checksum::inet_checksum(&[&buf]);
        buf[6..8].copy_from_slice(&ck.to_be_bytes());

        Ok(buf)
    }

    /// Parses a datagram from raw bytes.
    ///
    /// The checksum is verified before any field validation, so any
    /// corruption surfaces as `BadChecksum` (or `Truncated`) rather than a
    /// different valid frame.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Truncated("short header"));
        }

        let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        if buf.len() < HEADER_SIZE + length {
            return Err(Error::Truncated("payload shorter than length field"));
        }

        let stored_ck = u16::from_be_bytes([buf[6], buf[7]]);
        let zeroed = [0u8, 0u8];
        if !checksum::verify(
            &[&buf[..6], &zeroed, &buf[8..HEADER_SIZE + length]],
            stored_ck,
        ) {
            return Err(Error::BadChecksum);
        }

        let typ = MsgType::from_u8(buf[0]).ok_or(Error::UnknownType(buf[0]))?;
        let version = Version::from_u8(buf[1]).ok_or(Error::UnknownVersion(buf[1]))?;
        let flags = Flags::from_bits(u16::from_be_bytes([buf[2], buf[3]])).masked();
        let ack = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let seq = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);

        Ok(Self {
            typ,
            version,
            flags,
            ack,
            seq,
            payload: buf[HEADER_SIZE..HEADER_SIZE + length].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_data() {
        let d = Datagram::data(Version::Gbn, 7, b"fragment bytes".to_vec(), true);
        let wire = d.encode().unwrap();
        let back = Datagram::decode(&wire).unwrap();

        assert_eq!(back.typ, MsgType::Data);
        assert_eq!(back.version, Version::Gbn);
        assert_eq!(back.seq, 7);
        assert!(back.more_fragments());
        assert_eq!(back.payload, b"fragment bytes");
    }

    #[test]
    fn test_roundtrip_ack_sets_ack_valid() {
        let d = Datagram::ack(Version::Sw, 3);
        let back = Datagram::decode(&d.encode().unwrap()).unwrap();
        assert!(back.flags.contains(Flags::ACK_VALID));
        assert_eq!(back.ack, 3);
    }

    #[test]
    fn test_nonzero_acknum_sets_ack_valid() {
        let mut d = Datagram::bye(Version::Sw);
        d.ack = 9;
        let back = Datagram::decode(&d.encode().unwrap()).unwrap();
        assert!(back.flags.contains(Flags::ACK_VALID));
    }

    #[test]
    fn test_zero_acknum_leaves_flag_clear() {
        let d = Datagram::data(Version::Sw, 0, b"x".to_vec(), false);
        let back = Datagram::decode(&d.encode().unwrap()).unwrap();
        assert!(!back.flags.contains(Flags::ACK_VALID));
        assert!(!back.more_fragments());
    }

    #[test]
    fn test_length_bound() {
        let at_limit = Datagram::data(Version::Sw, 0, vec![0xAB; MSS], false);
        assert!(at_limit.encode().is_ok());

        let over = Datagram::data(Version::Sw, 0, vec![0xAB; MSS + 1], false);
        assert!(matches!(over.encode(), Err(Error::FrameTooBig(_))));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            Datagram::decode(&[0u8; 8]),
            Err(Error::Truncated(_))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let wire = Datagram::data(Version::Sw, 0, vec![1, 2, 3, 4], false)
            .encode()
            .unwrap();
        assert!(matches!(
            Datagram::decode(&wire[..wire.len() - 2]),
            Err(Error::Truncated(_))
        ));
    }

    #[test]
    fn test_single_byte_mutation_never_yields_another_frame() {
        let wire = Datagram::data(Version::Gbn, 5, b"checksum coverage".to_vec(), true)
            .encode()
            .unwrap();

        for i in 0..wire.len() {
            let mut corrupt = wire.clone();
            corrupt[i] ^= 0xFF;
            match Datagram::decode(&corrupt) {
                Err(Error::BadChecksum) | Err(Error::Truncated(_)) => {}
                other => panic!("mutation at byte {i} produced {other:?}"),
            }
        }
    }

    #[test]
    fn test_reserved_flag_bits_ignored() {
        let mut wire = Datagram::data(Version::Sw, 1, b"abc".to_vec(), false)
            .encode()
            .unwrap();

        // Set a reserved flag bit and patch the checksum so only the flag
        // differs from a well-formed frame.
        wire[3] |= 0x01;
        wire[6] = 0;
        wire[7] = 0;
        let ck = crate::core::checksum::inet_checksum(&[&wire]);
        wire[6..8].copy_from_slice(&ck.to_be_bytes());

        let back = Datagram::decode(&wire).unwrap();
        assert_eq!(back.flags, Flags::NONE);
        assert_eq!(back.payload, b"abc");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut wire = Datagram::bye(Version::Sw).encode().unwrap();
        wire[0] = 99;
        wire[6] = 0;
        wire[7] = 0;
        let ck = crate::core::checksum::inet_checksum(&[&wire]);
        wire[6..8].copy_from_slice(&ck.to_be_bytes());

        assert!(matches!(
            Datagram::decode(&wire),
            Err(Error::UnknownType(99))
        ));
    }
}
