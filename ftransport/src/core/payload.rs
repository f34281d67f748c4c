//! Control payload codec.
//!
//! REQUEST_*, OK and ERR frames carry a small dictionary as newline
//! delimited UTF-8 `key=value` lines. The recognised keys are `filename`,
//! `file_size` (decimal, upload requests only) and `message` (ERR only).

use super::datagram::{Datagram, MsgType, Version};
use crate::error::{Error, Result};

pub const KEY_FILENAME: &str = "filename";
pub const KEY_FILE_SIZE: &str = "file_size";
pub const KEY_MESSAGE: &str = "message";

/// Decoded view of a control frame's payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPayload {
    pub filename: Option<String>,
    pub file_size: Option<u64>,
    pub message: Option<String>,
}

impl ControlPayload {
    /// Parses `key=value` lines. Lines without `=` and unrecognised keys
    /// are skipped; a malformed `file_size` is an error.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload).map_err(|_| Error::InvalidField("payload"))?;

        let mut out = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                KEY_FILENAME => out.filename = Some(value.to_string()),
                KEY_FILE_SIZE => {
                    let size = value.parse().map_err(|_| Error::InvalidField(KEY_FILE_SIZE))?;
                    out.file_size = Some(size);
                }
                KEY_MESSAGE => out.message = Some(value.to_string()),
                _ => {}
            }
        }
        Ok(out)
    }

    pub fn require_filename(&self) -> Result<&str> {
        self.filename.as_deref().ok_or(Error::MissingField(KEY_FILENAME))
    }

    pub fn require_file_size(&self) -> Result<u64> {
        self.file_size.ok_or(Error::MissingField(KEY_FILE_SIZE))
    }

    fn encode_lines(pairs: &[(&str, String)]) -> Vec<u8> {
        pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n")
            .into_bytes()
    }
}

/// Builds a REQUEST_UPLOAD frame announcing `filename` and `file_size`.
pub fn make_request_upload(version: Version, filename: &str, file_size: u64) -> Datagram {
    let payload = ControlPayload::encode_lines(&[
        (KEY_FILENAME, filename.to_string()),
        (KEY_FILE_SIZE, file_size.to_string()),
    ]);
    Datagram::control(MsgType::RequestUpload, version, payload)
}

/// Builds a REQUEST_DOWNLOAD frame naming the wanted file.
pub fn make_request_download(version: Version, filename: &str) -> Datagram {
    let payload = ControlPayload::encode_lines(&[(KEY_FILENAME, filename.to_string())]);
    Datagram::control(MsgType::RequestDownload, version, payload)
}

/// Builds an OK frame.
pub fn make_ok(version: Version) -> Datagram {
    Datagram::control(MsgType::Ok, version, Vec::new())
}

/// Builds an ERR frame carrying a human-readable message.
pub fn make_err(version: Version, message: &str) -> Datagram {
    let payload = ControlPayload::encode_lines(&[(KEY_MESSAGE, message.to_string())]);
    Datagram::control(MsgType::Err, version, payload)
}
