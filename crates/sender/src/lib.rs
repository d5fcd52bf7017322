//! Client side of a snapbeam transfer.
//!
//! Each call opens its own TCP connection, authenticates with the session
//! token, sends exactly one file and closes the connection again, whether
//! it succeeded or not.

pub mod batch;
pub mod capability;
pub mod payload;
pub mod tcp;

pub use batch::{BatchOutcome, send_all};
pub use capability::{FileSender, SendFuture, SendRequest};
pub use payload::{MediaSource, StagingPolicy, TransferPayload, describe, dispatch};
pub use tcp::{StreamReport, TcpSender};

use snapbeam_transport::TransportError;

/// Block size for chunked streaming and for slicing large buffers (64 KiB).
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// In-memory payloads above this size are written in slices.
pub const SLICE_THRESHOLD: usize = 512_000;

/// Longest reply read back from the receiver.
pub const MAX_REPLY_LEN: usize = 1024;

/// Errors produced while sending a file.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cannot read {path}: {source}")]
    Source {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("payload is empty")]
    EmptyPayload,

    #[error("connection closed without reply")]
    NoReply,
}

impl From<std::io::Error> for SendError {
    fn from(e: std::io::Error) -> Self {
        SendError::Transport(TransportError::Io(e))
    }
}
