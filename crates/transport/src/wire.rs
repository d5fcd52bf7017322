//! Async read/write helpers for the per-file wire format.
//!
//! See the `snapbeam-protocol` crate docs for the byte layout; these
//! functions only move already-encoded units on and off a connection.

use tokio::io::{AsyncRead, AsyncWrite};

use snapbeam_protocol::{
    FRAME_PREFIX_LEN, HEADER_TERMINATOR, TransferHeader, decode_frame_length,
    encode_chunk_frame, encode_eof_frame,
};

use crate::MAX_UNIT_SIZE;
use crate::error::TransportError;
use crate::reader::BufferedReader;

/// Writes an encoded header block.
pub async fn write_header<S>(
    conn: &mut BufferedReader<S>,
    header: &TransferHeader,
) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    conn.write_all(&header.encode()).await?;
    conn.flush().await
}

/// Reads and parses a header block.
///
/// Lines are consumed one at a time up to the `ENDHEADER` line, so bytes
/// belonging to the body stay buffered. CRLF terminators are accepted.
pub async fn read_header<S>(conn: &mut BufferedReader<S>) -> Result<TransferHeader, TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut block = Vec::new();
    loop {
        let remaining = MAX_UNIT_SIZE.saturating_sub(block.len());
        if remaining == 0 {
            return Err(TransportError::UnitTooLarge {
                limit: MAX_UNIT_SIZE,
            });
        }
        let line = conn.read_until_within(b"\n", remaining).await?;
        let text = line.strip_suffix(b"\r").unwrap_or(&line);
        if text.trim_ascii() == HEADER_TERMINATOR.as_bytes() {
            break;
        }
        block.extend_from_slice(text);
        block.push(b'\n');
    }
    Ok(TransferHeader::parse_bytes(&block)?)
}

/// Writes one chunk frame. Empty payloads are skipped since a zero
/// length would read as EOF.
pub async fn write_chunk_frame<S>(
    conn: &mut BufferedReader<S>,
    payload: &[u8],
) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Ok(());
    }
    conn.write_all(&encode_chunk_frame(payload)?).await
}

/// Writes the EOF frame and flushes.
pub async fn write_eof_frame<S>(conn: &mut BufferedReader<S>) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    conn.write_all(&encode_eof_frame()).await?;
    conn.flush().await
}

/// Reads the next frame length prefix. `None` marks EOF.
pub async fn read_frame_length<S>(
    conn: &mut BufferedReader<S>,
) -> Result<Option<u32>, TransportError>
where
    S: AsyncRead + Unpin,
{
    let prefix = conn.read_array::<FRAME_PREFIX_LEN>().await?;
    match decode_frame_length(prefix) {
        0 => Ok(None),
        len => Ok(Some(len)),
    }
}
