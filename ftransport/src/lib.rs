//! Reliable file transfer over an unreliable datagram transport.
//!
//! The crate provides the pieces shared by the `upload`/`download` clients
//! and the `start-server` binary: the wire codec, the control-payload
//! codec, the two ARQ engines (Stop-and-Wait and Go-Back-N), the datagram
//! link abstraction that lets a server dispatcher feed a session from a
//! queue, the on-disk file store, and the transfer metrics sink.

pub mod arq;
pub mod buffer;
pub mod config;
pub mod core;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod transport;

pub use arq::Arq;
pub use config::{Config, HEADER_SIZE, MSS, MTU};
pub use self::core::{ControlPayload, Datagram, Flags, MsgType, Version};
pub use error::{Error, Result};
pub use metrics::TransferMetrics;
pub use storage::FileStore;
pub use transport::DatagramLink;
