use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::media::ImportOutcome;

/// Per-connection state machine.
///
/// `Listening -> Accepted -> Handshaking -> HeaderWait -> BodyReceive ->
/// Persisted -> [MediaImport] -> Done`, with `Failed` reachable from any
/// step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Listening,
    Accepted,
    Handshaking,
    HeaderWait,
    BodyReceive,
    Persisted,
    MediaImport,
    Done,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Done | TransferState::Failed)
    }
}

/// Receiver-wide status line. Last write wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverStatus {
    Idle,
    Listening { port: u16 },
    Handshaking { peer: SocketAddr },
    Rejected { peer: SocketAddr },
    Receiving { filename: String },
    Saved { filename: String },
    Imported { filename: String },
    ImportFailed { filename: String, reason: String },
    Error(String),
    Stopped,
}

impl fmt::Display for ReceiverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverStatus::Idle => f.write_str("Idle"),
            ReceiverStatus::Listening { port } => write!(f, "Listening on port {port}"),
            ReceiverStatus::Handshaking { peer } => write!(f, "Handshake with {peer}"),
            ReceiverStatus::Rejected { peer } => write!(f, "Rejected {peer}: invalid token"),
            ReceiverStatus::Receiving { filename } => write!(f, "Receiving {filename}..."),
            ReceiverStatus::Saved { filename } => write!(f, "Saved {filename}"),
            ReceiverStatus::Imported { filename } => write!(f, "Imported {filename} to library"),
            ReceiverStatus::ImportFailed { filename, reason } => {
                write!(f, "Saved {filename}; import failed: {reason}")
            }
            ReceiverStatus::Error(reason) => write!(f, "Error: {reason}"),
            ReceiverStatus::Stopped => f.write_str("Stopped"),
        }
    }
}

/// What happened on one accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub peer: SocketAddr,
    /// Sanitized filename, once a header was parsed.
    pub filename: Option<String>,
    /// Terminal state: `Done` or `Failed`.
    pub state: TransferState,
    /// Every state entered, in order.
    pub visited: Vec<TransferState>,
    /// Body bytes written to storage.
    pub bytes: u64,
    pub path: Option<PathBuf>,
    pub import: ImportOutcome,
    pub error: Option<String>,
}

impl TransferReport {
    pub fn succeeded(&self) -> bool {
        self.state == TransferState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        let peer: SocketAddr = "10.0.0.7:40000".parse().unwrap();
        assert_eq!(
            ReceiverStatus::Listening { port: 50505 }.to_string(),
            "Listening on port 50505"
        );
        assert_eq!(
            ReceiverStatus::Rejected { peer }.to_string(),
            "Rejected 10.0.0.7:40000: invalid token"
        );
        assert_eq!(
            ReceiverStatus::Receiving {
                filename: "a.jpg".into()
            }
            .to_string(),
            "Receiving a.jpg..."
        );
        assert_eq!(
            ReceiverStatus::ImportFailed {
                filename: "a.jpg".into(),
                reason: "denied".into()
            }
            .to_string(),
            "Saved a.jpg; import failed: denied"
        );
        assert_eq!(
            ReceiverStatus::Error("File truncated: wrote 60 of 100 bytes".into()).to_string(),
            "Error: File truncated: wrote 60 of 100 bytes"
        );
    }

    #[test]
    fn terminal_states() {
        assert!(TransferState::Done.is_terminal());
        assert!(TransferState::Failed.is_terminal());
        assert!(!TransferState::Persisted.is_terminal());
    }
}
