//! Wire-level building blocks: checksum, datagram codec, control payloads.

pub mod checksum;
pub mod datagram;
pub mod payload;

pub use datagram::{Datagram, Flags, MsgType, Version};
pub use payload::ControlPayload;
