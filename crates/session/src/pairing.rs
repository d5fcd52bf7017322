//! Desktop side of the QR pairing exchange.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use snapbeam_protocol::bootstrap::QR_PAYLOAD_VERSION;
use snapbeam_protocol::{PairRequest, PairResponse, QrPayload};
use snapbeam_transport::json_frame::{read_json, write_json};
use snapbeam_transport::{AcceptBackoff, DEFAULT_HANDSHAKE_TIMEOUT, SessionToken, with_timeout};

use crate::SessionError;

/// A client that completed pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedClient {
    pub client_name: String,
    pub device_id: String,
    pub peer: SocketAddr,
}

/// Answers pairing requests for one session.
pub struct PairingServer {
    session_id: String,
    name: String,
    host: String,
    transfer_port: u16,
    token: SessionToken,
    timeout: Duration,
}

impl PairingServer {
    /// Creates a server for a fresh session.
    ///
    /// `host` is the address clients should use for transfers and
    /// `transfer_port` the port the receiver listens on.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        transfer_port: u16,
        token: SessionToken,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            host: host.into(),
            transfer_port,
            token,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Payload to show as a QR code; `pairing_port` is where [`serve`]
    /// listens.
    ///
    /// [`serve`]: Self::serve
    pub fn qr_payload(&self, pairing_port: u16) -> QrPayload {
        QrPayload {
            version: QR_PAYLOAD_VERSION,
            host: self.host.clone(),
            port: pairing_port,
            token: self.token.as_str().to_string(),
            name: self.name.clone(),
            public_key: None,
        }
    }

    /// Accepts pairing connections until `cancel` fires.
    ///
    /// Each connection is answered on its own task; successful pairings
    /// are forwarded on `paired`.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        cancel: CancellationToken,
        paired: mpsc::Sender<PairedClient>,
    ) {
        let mut backoff = AcceptBackoff::default();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("pairing server cancelled");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((mut stream, peer)) => {
                            backoff.reset();
                            let server = Arc::clone(&self);
                            let paired = paired.clone();
                            tokio::spawn(async move {
                                match server.answer(&mut stream, peer).await {
                                    Ok(Some(client)) => {
                                        let _ = paired.send(client).await;
                                    }
                                    Ok(None) => {}
                                    Err(e) => warn!(%peer, "pairing failed: {e}"),
                                }
                            });
                        }
                        Err(e) => {
                            let delay = backoff.next_delay();
                            error!(retry_in_ms = delay.as_millis() as u64, "pairing accept error: {e}");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    /// Runs one request/response exchange.
    ///
    /// Returns the client on success and `None` when the token was wrong.
    pub async fn answer<S>(
        &self,
        stream: &mut S,
        peer: SocketAddr,
    ) -> Result<Option<PairedClient>, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request: PairRequest = with_timeout(self.timeout, read_json(stream)).await?;

        if !self.token.matches(&request.token) {
            warn!(%peer, client = %request.client_name, "pairing rejected: invalid token");
            with_timeout(
                self.timeout,
                write_json(stream, &PairResponse::rejected("invalid token")),
            )
            .await?;
            return Ok(None);
        }

        let response = PairResponse::accepted(
            self.session_id.clone(),
            self.host.clone(),
            self.transfer_port,
            self.name.clone(),
        );
        with_timeout(self.timeout, write_json(stream, &response)).await?;
        info!(%peer, client = %request.client_name, "client paired");

        Ok(Some(PairedClient {
            client_name: request.client_name,
            device_id: request.device_id,
            peer,
        }))
    }
}
