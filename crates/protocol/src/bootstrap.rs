//! Session bootstrap messages.
//!
//! The desktop shows a QR code carrying a [`QrPayload`]. The phone scans it,
//! connects to the pairing port and exchanges one [`PairRequest`] /
//! [`PairResponse`] pair (each a length-prefixed JSON document) to learn
//! where transfers go and which token to present.

use serde::{Deserialize, Serialize};

/// Current QR payload version.
pub const QR_PAYLOAD_VERSION: u32 = 1;

/// Contents of the pairing QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    #[serde(rename = "v", default = "default_version")]
    pub version: u32,
    pub host: String,
    /// Pairing (bootstrap) port, not the transfer port.
    pub port: u16,
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Carried for compatibility; never used for authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

fn default_version() -> u32 {
    QR_PAYLOAD_VERSION
}

impl QrPayload {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text.trim())
    }
}

/// Client -> desktop: asks to join the session advertised by the QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequest {
    pub client_name: String,
    pub device_id: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// Desktop -> client: pairing verdict and transfer endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Transfer port the receiver listens on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PairResponse {
    pub fn accepted(session_id: String, host: String, port: u16, name: String) -> Self {
        Self {
            accepted: true,
            session_id: Some(session_id),
            host: Some(host),
            port: Some(port),
            name: Some(name),
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            session_id: None,
            host: None,
            port: None,
            name: None,
            reason: Some(reason.into()),
        }
    }
}
