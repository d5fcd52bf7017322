//! The send capability shared by every transport implementation.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::SendError;

/// A boxed future resolving to a human-readable status line.
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

/// An in-memory file to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub data: Vec<u8>,
    pub filename: String,
    pub mime: String,
}

impl SendRequest {
    pub fn new(data: Vec<u8>, filename: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            data,
            filename: filename.into(),
            mime: mime.into(),
        }
    }
}

/// Something able to deliver a file to a receiver.
///
/// Both methods always resolve to a status string; failures are reported
/// in the string rather than raised, so callers can fire many sends and
/// show each result as-is.
pub trait FileSender: Send + Sync {
    /// Sends a whole buffer as a sized (non-chunked) transfer.
    fn send(&self, request: SendRequest) -> SendFuture<'_>;

    /// Streams a file from disk as a chunked transfer.
    fn send_file_stream<'a>(
        &'a self,
        location: &'a Path,
        filename: Option<&'a str>,
    ) -> SendFuture<'a>;
}

/// Status line for a failed send.
pub fn failure_status(err: &SendError) -> String {
    format!("Send failed: {err}")
}

/// Status line for a receiver reply.
pub fn reply_status(reply: &str) -> String {
    format!("Server replied: {reply}")
}

/// Status line for a finished chunked stream.
pub fn stream_status(filename: &str, bytes: u64) -> String {
    format!("Sent {filename} ({bytes} bytes, streamed)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines() {
        assert_eq!(reply_status("OK"), "Server replied: OK");
        assert_eq!(
            failure_status(&SendError::NoReply),
            "Send failed: connection closed without reply"
        );
        assert_eq!(
            stream_status("clip.mov", 42),
            "Sent clip.mov (42 bytes, streamed)"
        );
    }
}
