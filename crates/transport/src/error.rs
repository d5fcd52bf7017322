//! Error types for connection-level I/O.

use snapbeam_protocol::{FrameError, HeaderError};

/// Errors produced while driving a snapbeam connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    #[error("File truncated: wrote {written} of {expected} bytes")]
    Truncated { written: u64, expected: u64 },

    #[error("protocol unit exceeds {limit} bytes")]
    UnitTooLarge { limit: usize },

    #[error("handshake rejected: {0}")]
    Rejected(String),

    #[error("timed out")]
    Timeout,

    #[error("invalid header: {0}")]
    Header(#[from] HeaderError),

    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
