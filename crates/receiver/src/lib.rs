//! Server side of a snapbeam transfer.
//!
//! One listener per session. Every accepted connection runs on its own
//! task through the per-connection state machine in [`connection`] and
//! ends in exactly one [`TransferReport`].

pub mod connection;
pub mod media;
pub mod server;
pub mod state;

pub use media::{ImportFuture, ImportOutcome, LibraryImporter, MediaImporter, NoImport};
pub use server::{Receiver, ReceiverConfig, ReceiverHandle};
pub use state::{ReceiverStatus, TransferReport, TransferState};

use snapbeam_transport::TransportError;

/// Finished-transfer reports buffered per listener before new ones are dropped.
pub const DEFAULT_REPORT_CAPACITY: usize = 64;

/// Pending-connection backlog for the listening socket.
pub const LISTEN_BACKLOG: u32 = 128;

/// Errors produced by the receiver.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("cannot listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("File truncated: wrote {written} of {expected} bytes")]
    FileTruncated { written: u64, expected: u64 },

    #[error("stream ended before EOF frame after {written} bytes")]
    StreamEnded { written: u64 },

    #[error("cannot write {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
