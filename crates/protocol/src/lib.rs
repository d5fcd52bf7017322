//! Wire formats shared by the snapbeam sender and receiver.
//!
//! Pure encode/decode only; all I/O lives in `snapbeam-transport`.
//!
//! # Per-file connection
//!
//! ```text
//! [handshake]  <token>\n            ->
//!              ACCEPT\n | REJECT\n  <-
//! [header]     FILENAME/SIZE/MIME/[CHUNKED] lines, ENDHEADER\n
//! [body]       SIZE raw bytes, or { [u32 BE len][bytes] }* [u32 BE 0]
//! [reply]      short free text, e.g. OK
//! ```

pub mod bootstrap;
pub mod filename;
pub mod frame;
pub mod header;
pub mod media;

pub use bootstrap::{PairRequest, PairResponse, QrPayload};
pub use filename::sanitize_filename;
pub use frame::{
    FRAME_PREFIX_LEN, FrameError, decode_frame_length, encode_chunk_frame, encode_eof_frame,
};
pub use header::{HeaderError, TransferHeader};
pub use media::{MediaKind, guess_mime};

/// MIME type assumed when a header omits one.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Line terminating the header block.
pub const HEADER_TERMINATOR: &str = "ENDHEADER";

/// Handshake reply: token accepted.
pub const HANDSHAKE_ACCEPT: &str = "ACCEPT";

/// Handshake reply: token rejected.
pub const HANDSHAKE_REJECT: &str = "REJECT";

/// Reply written by the receiver once a file is persisted.
pub const REPLY_OK: &str = "OK";
