//! Connection plumbing for snapbeam transfers.
//!
//! Everything that touches a socket goes through [`BufferedReader`]:
//! TCP hands out arbitrary slices while the protocol works in lines,
//! fixed-size prefixes and exact-length bodies.

pub mod backoff;
pub mod error;
pub mod handshake;
pub mod json_frame;
pub mod reader;
pub mod storage;
pub mod token;
pub mod wire;

pub use backoff::AcceptBackoff;
pub use error::TransportError;
pub use handshake::{present_token, verify_token};
pub use reader::BufferedReader;
pub use storage::{FsStorage, ReadSource, StagedFile, Storage, WriteSink};
pub use token::SessionToken;

use std::future::Future;
use std::time::Duration;

/// Default size of a single raw read from the socket.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Batch size used when copying an exact-length body to its sink.
pub const RECEIVE_BATCH_SIZE: usize = 8 * 1024;

/// Largest delimiter-terminated unit (token line, header block).
pub const MAX_UNIT_SIZE: usize = 64 * 1024;

/// Timeout for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the token exchange and the header block.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for any single read while a body or reply is in flight.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-step deadlines applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub handshake: Duration,
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            handshake: DEFAULT_HANDSHAKE_TIMEOUT,
            idle: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Runs `fut` with a deadline, mapping expiry to [`TransportError::Timeout`].
pub async fn with_timeout<T, E, F>(limit: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<TransportError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(TransportError::Timeout),
    }
}
