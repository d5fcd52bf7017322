//! Length-prefixed JSON messages used by the session bootstrap.
//!
//! ```text
//! [4 bytes BE: len][len bytes: UTF-8 JSON]
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Largest JSON document accepted in either direction.
pub const MAX_JSON_FRAME: usize = 64 * 1024;

/// Serializes `value` and writes it as one frame.
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_JSON_FRAME {
        return Err(TransportError::UnitTooLarge {
            limit: MAX_JSON_FRAME,
        });
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame and deserializes it.
pub async fn read_json<R, T>(reader: &mut R) -> Result<T, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransportError::UnexpectedEndOfStream);
        }
        Err(e) => return Err(e.into()),
    };
    if len > MAX_JSON_FRAME {
        return Err(TransportError::UnitTooLarge {
            limit: MAX_JSON_FRAME,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::UnexpectedEndOfStream
        } else {
            e.into()
        }
    })?;
    Ok(serde_json::from_slice(&body)?)
}
