//! Session bootstrap for snapbeam.
//!
//! The desktop runs a [`PairingServer`] and shows its [`QrPayload`] as a
//! QR code. A client scans it and calls [`Connector::pair`], which
//! validates the token over one length-prefixed JSON exchange and saves
//! the resulting session (host, transfer port, token) in a
//! [`SessionStore`]. Every later transfer uses that saved token.
//!
//! [`QrPayload`]: snapbeam_protocol::QrPayload

pub mod connector;
pub mod pairing;
pub mod qr;
pub mod store;

pub use connector::{ClientIdentity, Connector};
pub use pairing::{PairedClient, PairingServer};
pub use qr::{local_lan_address, render_qr};
pub use store::{SavedSession, SessionStore, config_dir};

use snapbeam_transport::TransportError;

/// Errors from pairing and session persistence.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid QR payload: {0}")]
    InvalidQr(String),

    #[error("unsupported QR payload version {0}")]
    UnsupportedVersion(u32),

    #[error("pairing rejected: {0}")]
    Rejected(String),

    #[error("pairing response missing {0}")]
    IncompleteResponse(&'static str),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("cannot render QR code: {0}")]
    Qr(String),
}
