//! Payload staging: decide whether a file travels from memory or as a
//! chunked stream.

use std::fmt;
use std::path::{Path, PathBuf};

use snapbeam_protocol::{MediaKind, guess_mime};

use crate::SendError;
use crate::capability::{FileSender, SendRequest};

/// Default in-memory limit before a file is streamed instead (16 MiB).
pub const DEFAULT_MEMORY_LIMIT: u64 = 16 * 1024 * 1024;

/// A file picked for sending, before staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub location: PathBuf,
    pub filename: Option<String>,
    pub mime: Option<String>,
}

impl MediaSource {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            filename: None,
            mime: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    fn display_name(&self) -> String {
        match &self.filename {
            Some(name) => name.clone(),
            None => file_name_of(&self.location),
        }
    }
}

/// A staged payload ready to hand to a [`FileSender`].
#[derive(Clone, PartialEq, Eq)]
pub enum TransferPayload {
    Memory {
        data: Vec<u8>,
        filename: String,
        mime: String,
    },
    Stream {
        location: PathBuf,
        filename: Option<String>,
    },
}

impl fmt::Debug for TransferPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(self))
    }
}

/// Chooses memory or streaming per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingPolicy {
    pub memory_limit: u64,
}

impl Default for StagingPolicy {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl StagingPolicy {
    pub fn new(memory_limit: u64) -> Self {
        Self { memory_limit }
    }

    /// Videos and anything above the memory limit stream from disk;
    /// everything else is read into memory.
    pub async fn stage(&self, source: MediaSource) -> Result<TransferPayload, SendError> {
        let filename = source.display_name();
        let mime = source
            .mime
            .clone()
            .unwrap_or_else(|| guess_mime(&filename).to_string());

        let unreadable = |e: std::io::Error| SendError::Source {
            path: source.location.display().to_string(),
            source: e,
        };
        let len = tokio::fs::metadata(&source.location)
            .await
            .map_err(unreadable)?
            .len();

        if MediaKind::from_mime(&mime) == MediaKind::Video || len > self.memory_limit {
            return Ok(TransferPayload::Stream {
                location: source.location,
                filename: source.filename,
            });
        }

        let data = tokio::fs::read(&source.location).await.map_err(unreadable)?;
        Ok(TransferPayload::Memory {
            data,
            filename,
            mime,
        })
    }
}

/// Sends `payload` through the matching capability method.
pub async fn dispatch(sender: &dyn FileSender, payload: TransferPayload) -> String {
    match payload {
        TransferPayload::Memory {
            data,
            filename,
            mime,
        } => sender.send(SendRequest::new(data, filename, mime)).await,
        TransferPayload::Stream { location, filename } => {
            sender
                .send_file_stream(&location, filename.as_deref())
                .await
        }
    }
}

/// Short label for progress lines.
pub fn describe(payload: &TransferPayload) -> String {
    match payload {
        TransferPayload::Memory { data, filename, .. } => {
            format!("{filename} ({} bytes in memory)", data.len())
        }
        TransferPayload::Stream { location, filename } => {
            let name = filename.clone().unwrap_or_else(|| file_name_of(location));
            format!("{name} (streamed from {})", location.display())
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
