//! Length-prefixed chunk frames for chunked bodies.
//!
//! ```text
//! FRAME: [4 bytes BE: len][len bytes: payload]
//! EOF:   [4 bytes: 0x00000000]
//! ```

/// Size of the big-endian length prefix.
pub const FRAME_PREFIX_LEN: usize = 4;

/// Errors produced while encoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("chunk payload too large: {0} bytes (max {max})", max = u32::MAX)]
    PayloadTooLarge(usize),
}

/// Wraps `payload` in a frame.
///
/// An empty payload encodes as the EOF marker, so callers streaming data
/// must skip empty reads.
pub fn encode_chunk_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
    let mut out = Vec::with_capacity(FRAME_PREFIX_LEN + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// The zero-length frame terminating a chunked body.
pub fn encode_eof_frame() -> [u8; FRAME_PREFIX_LEN] {
    [0; FRAME_PREFIX_LEN]
}

/// Decodes a frame length prefix. Zero means EOF.
pub fn decode_frame_length(prefix: [u8; FRAME_PREFIX_LEN]) -> u32 {
    u32::from_be_bytes(prefix)
}
