//! Per-connection token handshake.
//!
//! ```text
//! sender   -> receiver:  <token>\n
//! receiver -> sender:    ACCEPT\n | REJECT\n
//! ```
//!
//! Runs first on every transfer connection; nothing else is read or
//! written until it succeeds.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use snapbeam_protocol::{HANDSHAKE_ACCEPT, HANDSHAKE_REJECT};

use crate::error::TransportError;
use crate::reader::BufferedReader;
use crate::token::SessionToken;

/// Longest token line a receiver will buffer.
pub const MAX_TOKEN_LINE: usize = 1024;

/// Longest handshake reply a sender will buffer.
pub const MAX_HANDSHAKE_REPLY: usize = 64;

/// Sender side: presents `token` and waits for `ACCEPT`.
///
/// Any other reply, including `REJECT`, is a hard failure.
pub async fn present_token<S>(
    conn: &mut BufferedReader<S>,
    token: &SessionToken,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(token.as_str().len() + 1);
    line.extend_from_slice(token.as_str().as_bytes());
    line.push(b'\n');
    conn.write_all(&line).await?;
    conn.flush().await?;

    let reply = conn.read_until_within(b"\n", MAX_HANDSHAKE_REPLY).await?;
    let reply = String::from_utf8_lossy(&reply);
    let reply = reply.trim();
    if reply == HANDSHAKE_ACCEPT {
        debug!("handshake accepted");
        Ok(())
    } else {
        Err(TransportError::Rejected(reply.to_string()))
    }
}

/// Receiver side: reads the presented token and answers it.
///
/// With no expected token every connection is rejected. On rejection
/// `REJECT\n` is sent (best effort) and an error is returned so the caller
/// tears the connection down without reading further.
pub async fn verify_token<S>(
    conn: &mut BufferedReader<S>,
    expected: Option<&SessionToken>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let raw = conn.read_until_within(b"\n", MAX_TOKEN_LINE).await?;
    let presented = String::from_utf8_lossy(&raw);
    let presented = presented.trim();

    let reason = match expected {
        None => Some("no session configured"),
        Some(token) if !token.matches(presented) => Some("invalid token"),
        Some(_) => None,
    };

    if let Some(reason) = reason {
        warn!(reason, "rejecting handshake");
        let reject = format!("{HANDSHAKE_REJECT}\n");
        if conn.write_all(reject.as_bytes()).await.is_ok() {
            let _ = conn.flush().await;
        }
        return Err(TransportError::Rejected(reason.to_string()));
    }

    conn.write_all(format!("{HANDSHAKE_ACCEPT}\n").as_bytes()).await?;
    conn.flush().await?;
    debug!("handshake accepted peer token");
    Ok(())
}
