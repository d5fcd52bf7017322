//! Client side of pairing, and sender construction from saved sessions.

use std::sync::Arc;

use chrono::Utc;
use tokio::net::TcpStream;
use tracing::info;

use snapbeam_protocol::bootstrap::QR_PAYLOAD_VERSION;
use snapbeam_protocol::{PairRequest, PairResponse, QrPayload};
use snapbeam_sender::TcpSender;
use snapbeam_transport::json_frame::{read_json, write_json};
use snapbeam_transport::{SessionToken, Timeouts, with_timeout};

use crate::SessionError;
use crate::store::{SavedSession, SessionStore};

/// How this client introduces itself when pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_name: String,
    pub device_id: String,
}

impl ClientIdentity {
    pub fn new(client_name: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            device_id: device_id.into(),
        }
    }
}

/// Pairs with receivers and builds senders for saved sessions.
pub struct Connector {
    identity: ClientIdentity,
    store: Arc<SessionStore>,
    timeouts: Timeouts,
}

impl Connector {
    pub fn new(identity: ClientIdentity, store: Arc<SessionStore>) -> Self {
        Self {
            identity,
            store,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Pairs using the text decoded from a QR code and saves the session.
    pub async fn pair(&self, qr_text: &str) -> Result<SavedSession, SessionError> {
        let qr = QrPayload::from_json(qr_text).map_err(|e| SessionError::InvalidQr(e.to_string()))?;
        if qr.version != QR_PAYLOAD_VERSION {
            return Err(SessionError::UnsupportedVersion(qr.version));
        }

        let mut stream = with_timeout(
            self.timeouts.connect,
            TcpStream::connect((qr.host.as_str(), qr.port)),
        )
        .await?;

        let request = PairRequest {
            client_name: self.identity.client_name.clone(),
            device_id: self.identity.device_id.clone(),
            token: qr.token.clone(),
            public_key: qr.public_key.clone(),
        };
        let response = with_timeout(self.timeouts.handshake, async {
            write_json(&mut stream, &request).await?;
            read_json::<_, PairResponse>(&mut stream).await
        })
        .await?;

        if !response.accepted {
            let reason = response
                .reason
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(SessionError::Rejected(reason));
        }

        let session = SavedSession {
            session_id: response
                .session_id
                .ok_or(SessionError::IncompleteResponse("sessionId"))?,
            port: response
                .port
                .ok_or(SessionError::IncompleteResponse("port"))?,
            host: response.host.filter(|h| !h.is_empty()).unwrap_or(qr.host),
            name: response.name.unwrap_or(qr.name),
            token: qr.token,
            paired_at: Utc::now(),
        };
        self.store.save(session.clone())?;
        info!(
            session = %session.session_id,
            host = %session.host,
            port = session.port,
            "paired"
        );
        Ok(session)
    }

    /// Builds a sender for a saved session.
    pub fn sender_for(&self, session_id: &str) -> Result<TcpSender, SessionError> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        Ok(
            TcpSender::new(session.host, session.port, SessionToken::from(session.token))
                .with_timeouts(self.timeouts),
        )
    }

    pub fn sessions(&self) -> Vec<SavedSession> {
        self.store.list()
    }

    /// Forgets a saved session. Returns whether it existed.
    pub fn forget(&self, session_id: &str) -> Result<bool, SessionError> {
        self.store.remove(session_id)
    }
}
