use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Direction of a data-plane request, used in [`TransferError::Io`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Unified error type for the upload bridge.
///
/// Every block-device call surfaces one of these directly; nothing is retried. Data-plane
/// failures ([`TransferError::Io`], [`TransferError::ShortRead`] and transport-level
/// [`TransferError::Http`] errors raised while serving I/O) additionally mark the session as
/// failed so that closing it removes the disk instead of finalizing it.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Missing, invalid or inconsistent input, including a direct upload request the server
    /// cannot satisfy.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// A polling deadline elapsed (disk readiness, transfer readiness or finalization).
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: &'static str, waited: Duration },

    /// The data endpoint answered a read or write with an unexpected HTTP status.
    #[error("could not {op} sector ({offset}, {len}): {status}: {reason}")]
    Io {
        op: IoOp,
        offset: u64,
        len: u64,
        status: u16,
        reason: String,
    },

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds { offset: u64, len: u64, capacity: u64 },

    /// The management API rejected a request.
    #[error("management API request failed with HTTP status {status}: {message}")]
    Api { status: u16, message: String },

    /// Transport failure (DNS, connect, reset). URLs in the message are redacted.
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("VM already exists with name '{name}', id '{id}'")]
    VmExists { name: String, id: String },

    #[error("local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransferError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
