//! Byte-buffer wrapper that turns raw socket reads into protocol units.
//!
//! Bytes that arrive past a delimiter in the same raw read stay in the
//! buffer and are served first by the next call. Losing or duplicating one
//! of them would desynchronise every frame that follows.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;
use crate::{MAX_UNIT_SIZE, READ_CHUNK_SIZE, RECEIVE_BATCH_SIZE};

/// Buffered view over a duplex connection.
pub struct BufferedReader<S> {
    stream: S,
    buf: Vec<u8>,
    read_chunk: usize,
    idle_timeout: Option<Duration>,
}

impl<S> BufferedReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            read_chunk: READ_CHUNK_SIZE,
            idle_timeout: None,
        }
    }

    /// Sets the size requested from each raw read. Tuning only.
    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk.max(1);
        self
    }

    /// Fails any single raw read or write that stalls longer than `limit`.
    pub fn set_idle_timeout(&mut self, limit: Option<Duration>) {
        self.idle_timeout = limit;
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }
}

/// Applies the idle limit, if any, to one raw socket operation.
async fn bounded<T, F>(limit: Option<Duration>, op: F) -> Result<T, TransportError>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, op).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::Timeout),
        },
        None => op.await.map_err(TransportError::from),
    }
}

impl<S: AsyncRead + Unpin> BufferedReader<S> {
    /// Performs one raw read of at most `max` bytes into the buffer.
    ///
    /// Returns the number of bytes appended; 0 means the peer closed.
    async fn fill(&mut self, max: usize) -> Result<usize, TransportError> {
        let start = self.buf.len();
        self.buf.resize(start + max, 0);

        let outcome = bounded(self.idle_timeout, self.stream.read(&mut self.buf[start..])).await;

        match outcome {
            Ok(n) => {
                self.buf.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.buf.truncate(start);
                Err(e)
            }
        }
    }

    /// Reads until `delimiter` and returns the bytes before it.
    ///
    /// The unit and its delimiter are removed from the buffer; any bytes
    /// after the delimiter are kept for the next read.
    pub async fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.read_until_within(delimiter, MAX_UNIT_SIZE).await
    }

    /// Like [`read_until`](Self::read_until) with an explicit size cap.
    pub async fn read_until_within(
        &mut self,
        delimiter: &[u8],
        limit: usize,
    ) -> Result<Vec<u8>, TransportError> {
        debug_assert!(!delimiter.is_empty(), "empty delimiter");
        let mut scanned = 0;

        loop {
            if let Some(pos) = find(&self.buf[scanned..], delimiter) {
                let end = scanned + pos;
                let unit = self.buf[..end].to_vec();
                self.buf.drain(..end + delimiter.len());
                return Ok(unit);
            }

            if self.buf.len() > limit {
                return Err(TransportError::UnitTooLarge { limit });
            }

            // A delimiter may straddle two reads; rescan its possible prefix.
            scanned = self.buf.len().saturating_sub(delimiter.len() - 1);

            if self.fill(self.read_chunk).await? == 0 {
                return Err(TransportError::UnexpectedEndOfStream);
            }
        }
    }

    /// Returns up to `n` bytes.
    ///
    /// Buffered bytes are served first without touching the socket. Only
    /// when the buffer is empty is exactly one raw read performed. An
    /// empty result means the peer closed the connection.
    pub async fn receive_up_to(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        if self.buf.is_empty() {
            self.fill(self.read_chunk.max(n)).await?;
        }
        let take = n.min(self.buf.len());
        Ok(self.buf.drain(..take).collect())
    }

    /// Copies exactly `n` bytes into `destination`.
    ///
    /// Fails with [`TransportError::Truncated`] if the stream ends early;
    /// bytes already copied stay in the destination.
    pub async fn receive_exact<W>(
        &mut self,
        destination: &mut W,
        n: u64,
    ) -> Result<u64, TransportError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        while written < n {
            let want = (n - written).min(RECEIVE_BATCH_SIZE as u64) as usize;
            let chunk = self.receive_up_to(want).await?;
            if chunk.is_empty() {
                return Err(TransportError::Truncated {
                    written,
                    expected: n,
                });
            }
            destination.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    /// Reads a fixed-size unit such as a frame length prefix.
    pub async fn read_array<const N: usize>(&mut self) -> Result<[u8; N], TransportError> {
        let mut out = [0u8; N];
        let mut filled = 0;
        while filled < N {
            let chunk = self.receive_up_to(N - filled).await?;
            if chunk.is_empty() {
                return Err(TransportError::UnexpectedEndOfStream);
            }
            out[filled..filled + chunk.len()].copy_from_slice(&chunk);
            filled += chunk.len();
        }
        Ok(out)
    }
}

impl<S: AsyncWrite + Unpin> BufferedReader<S> {
    /// Writes all of `bytes`. The idle limit applies to each raw write, so
    /// a peer that stops reading fails the call instead of parking it.
    pub async fn write_all(&mut self, mut bytes: &[u8]) -> Result<(), TransportError> {
        while !bytes.is_empty() {
            let n = bounded(self.idle_timeout, self.stream.write(bytes)).await?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
            }
            bytes = &bytes[n..];
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), TransportError> {
        bounded(self.idle_timeout, self.stream.flush()).await
    }

    /// Shuts down the write half, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        bounded(self.idle_timeout, self.stream.shutdown()).await
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
