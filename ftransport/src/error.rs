//! Error types for the transfer protocol.

use std::io;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the transfer protocol.
///
/// The codec variants (`Truncated`, `BadChecksum`, `UnknownType`) are
/// transient: the ARQ engines drop the offending frame and let the
/// retransmission machinery cover the gap. The remaining variants are
/// fatal for the session they occur in.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Payload exceeds MSS at encode time; a bug in the caller.
    #[error("frame too big: payload {0} exceeds MSS")]
    FrameTooBig(usize),

    /// Fewer bytes than the header, or the announced length overruns them.
    #[error("truncated frame: {0}")]
    Truncated(&'static str),

    /// Recomputed checksum differs from the header's.
    #[error("checksum mismatch")]
    BadChecksum,

    /// Unrecognised message type code.
    #[error("unknown message type {0}")]
    UnknownType(u8),

    /// Unrecognised protocol version code.
    #[error("unknown protocol version {0}")]
    UnknownVersion(u8),

    /// A control payload was missing a required key.
    #[error("missing control field `{0}`")]
    MissingField(&'static str),

    /// A control payload carried a malformed value.
    #[error("invalid control field `{0}`")]
    InvalidField(&'static str),

    /// The request retry budget ran out without a server reply.
    #[error("handshake timed out after {0} attempts")]
    HandshakeTimeout(u32),

    /// The server answered the handshake with ERR.
    #[error("{0}")]
    ServerError(String),

    /// The requested file does not exist in the store.
    #[error("file '{0}' not found")]
    FileNotFound(String),

    /// A filename that is not a plain file name (path separators, `..`).
    #[error("invalid filename '{0}'")]
    InvalidFilename(String),

    /// A blocking receive exhausted its time budget.
    #[error("timed out waiting for peer")]
    Timeout,

    /// The datagram feed was closed underneath the session.
    #[error("link closed")]
    LinkClosed,

    /// `send_bye_with_retry` exhausted its budget without seeing OK.
    #[error("teardown failed after {0} attempts")]
    TeardownFailure(u32),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True for codec failures the ARQ layer silently discards.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Truncated(_)
                | Error::BadChecksum
                | Error::UnknownType(_)
                | Error::UnknownVersion(_)
        )
    }
}
