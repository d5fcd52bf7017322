//! Text header block preceding every transfer body.
//!
//! # Wire format
//!
//! ```text
//! FILENAME:<name>\n
//! SIZE:<bytes>\n
//! MIME:<mime-type>\n
//! [CHUNKED:YES\n]
//! ENDHEADER\n
//! ```
//!
//! Encoding always emits `\n` and the field order above. Parsing accepts
//! `\r\n`, any field order, arbitrary whitespace around keys and values,
//! and case-insensitive keys. Unknown keys are ignored.

use std::collections::HashMap;

use crate::{DEFAULT_MIME, HEADER_TERMINATOR};

const KEY_FILENAME: &str = "FILENAME";
const KEY_SIZE: &str = "SIZE";
const KEY_MIME: &str = "MIME";
const KEY_CHUNKED: &str = "CHUNKED";

/// Errors produced while parsing a header block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("header is missing FILENAME")]
    MissingFilename,

    #[error("invalid SIZE for non-chunked transfer: {0}")]
    InvalidSize(String),

    #[error("header is not valid UTF-8")]
    Encoding,
}

/// Metadata describing the payload that follows the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub filename: String,
    /// Payload length in bytes. Ignored (sent as 0) when `chunked` is set.
    pub size: u64,
    pub mime: String,
    pub chunked: bool,
}

impl TransferHeader {
    /// Header for a whole-buffer transfer of `size` bytes.
    pub fn sized(filename: impl Into<String>, size: u64, mime: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            size,
            mime: mime.into(),
            chunked: false,
        }
    }

    /// Header for a chunked transfer of unknown length.
    pub fn chunked(filename: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            size: 0,
            mime: mime.into(),
            chunked: true,
        }
    }

    /// Serializes the header block, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!(
            "{KEY_FILENAME}:{}\n{KEY_SIZE}:{}\n{KEY_MIME}:{}\n",
            self.filename, self.size, self.mime
        );
        if self.chunked {
            out.push_str(KEY_CHUNKED);
            out.push_str(":YES\n");
        }
        out.push_str(HEADER_TERMINATOR);
        out.push('\n');
        out.into_bytes()
    }

    /// Parses a header block from raw bytes.
    pub fn parse_bytes(raw: &[u8]) -> Result<Self, HeaderError> {
        let text = std::str::from_utf8(raw).map_err(|_| HeaderError::Encoding)?;
        Self::parse(text)
    }

    /// Parses a header block.
    ///
    /// The terminator line is optional; anything after it is ignored.
    pub fn parse(text: &str) -> Result<Self, HeaderError> {
        let normalized = text.replace("\r\n", "\n");
        let mut fields: HashMap<String, String> = HashMap::new();

        for line in normalized.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == HEADER_TERMINATOR {
                break;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            fields.insert(key.trim().to_ascii_uppercase(), value.trim().to_string());
        }

        let filename = match fields.remove(KEY_FILENAME) {
            Some(name) if !name.is_empty() => name,
            _ => return Err(HeaderError::MissingFilename),
        };

        let chunked = fields
            .get(KEY_CHUNKED)
            .is_some_and(|v| is_truthy(v));

        let raw_size = fields.remove(KEY_SIZE).unwrap_or_default();
        // Negative or malformed sizes collapse to 0.
        let size = raw_size.parse::<u64>().unwrap_or(0);
        if !chunked && size == 0 {
            let shown = if raw_size.is_empty() {
                "missing".to_string()
            } else {
                raw_size
            };
            return Err(HeaderError::InvalidSize(shown));
        }

        let mime = fields
            .remove(KEY_MIME)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME.to_string());

        Ok(Self {
            filename,
            size: if chunked { 0 } else { size },
            mime,
            chunked,
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_uppercase().as_str(),
        "YES" | "TRUE" | "1"
    )
}
