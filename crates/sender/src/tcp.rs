//! TCP sender.
//!
//! Opens one connection per file, presents the session token and then
//! writes either a sized body or a chunked stream.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use snapbeam_protocol::{TransferHeader, guess_mime, sanitize_filename};
use snapbeam_transport::wire::{write_chunk_frame, write_eof_frame, write_header};
use snapbeam_transport::{
    BufferedReader, FsStorage, SessionToken, Storage, Timeouts, present_token, with_timeout,
};

use crate::capability::{
    FileSender, SendFuture, SendRequest, failure_status, reply_status, stream_status,
};
use crate::{MAX_REPLY_LEN, SLICE_THRESHOLD, STREAM_CHUNK_SIZE, SendError};

/// Outcome of a successful chunked stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub filename: String,
    pub bytes: u64,
    pub frames: usize,
    /// Acknowledgment text, if the receiver sent one.
    pub ack: Option<String>,
}

/// Sends files to one receiver over plain TCP.
#[derive(Clone)]
pub struct TcpSender {
    host: String,
    port: u16,
    token: SessionToken,
    timeouts: Timeouts,
    storage: Arc<dyn Storage>,
}

impl TcpSender {
    pub fn new(host: impl Into<String>, port: u16, token: SessionToken) -> Self {
        Self {
            host: host.into(),
            port,
            token,
            timeouts: Timeouts::default(),
            storage: Arc::new(FsStorage::default()),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Connects and completes the token handshake.
    async fn connect(&self) -> Result<BufferedReader<TcpStream>, SendError> {
        let stream = with_timeout(
            self.timeouts.connect,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await?;
        stream.set_nodelay(true)?;
        debug!(host = %self.host, port = self.port, "connected");

        let mut conn = BufferedReader::new(stream);
        conn.set_idle_timeout(Some(self.timeouts.idle));
        with_timeout(self.timeouts.handshake, present_token(&mut conn, &self.token)).await?;
        Ok(conn)
    }

    /// Sends `request` as a sized transfer and returns the trimmed reply.
    pub async fn try_send(&self, request: SendRequest) -> Result<String, SendError> {
        if request.data.is_empty() {
            return Err(SendError::EmptyPayload);
        }
        let filename = sanitize_filename(&request.filename);
        let header = TransferHeader::sized(
            filename.as_str(),
            request.data.len() as u64,
            request.mime.as_str(),
        );

        let mut conn = self.connect().await?;
        write_header(&mut conn, &header).await?;

        if request.data.len() > SLICE_THRESHOLD {
            for slice in request.data.chunks(STREAM_CHUNK_SIZE) {
                conn.write_all(slice).await?;
            }
        } else {
            conn.write_all(&request.data).await?;
        }
        conn.flush().await?;
        debug!(%filename, bytes = request.data.len(), "body written");

        let reply = conn.receive_up_to(MAX_REPLY_LEN).await?;
        let reply = String::from_utf8_lossy(&reply).trim().to_string();
        if reply.is_empty() {
            return Err(SendError::NoReply);
        }
        let _ = conn.shutdown().await;
        Ok(reply)
    }

    /// Streams the file at `location` as chunk frames.
    ///
    /// The file is opened before connecting so a missing source never
    /// reaches the receiver. The trailing acknowledgment is best effort.
    pub async fn try_send_file_stream(
        &self,
        location: &Path,
        filename: Option<&str>,
    ) -> Result<StreamReport, SendError> {
        let name = match filename {
            Some(name) => name.to_string(),
            None => location
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let name = sanitize_filename(&name);
        let header = TransferHeader::chunked(name.as_str(), guess_mime(&name));

        let mut source =
            self.storage
                .open_for_reading(location)
                .await
                .map_err(|source| SendError::Source {
                    path: location.display().to_string(),
                    source,
                })?;

        let mut conn = self.connect().await?;
        write_header(&mut conn, &header).await?;

        let mut block = vec![0u8; STREAM_CHUNK_SIZE];
        let mut bytes = 0u64;
        let mut frames = 0usize;
        loop {
            let n = read_block(&mut source, &mut block).await?;
            if n == 0 {
                break;
            }
            write_chunk_frame(&mut conn, &block[..n]).await?;
            bytes += n as u64;
            frames += 1;
        }
        write_eof_frame(&mut conn).await?;
        debug!(filename = %name, bytes, frames, "stream written");

        let ack = match conn.receive_up_to(MAX_REPLY_LEN).await {
            Ok(raw) => Some(String::from_utf8_lossy(&raw).trim().to_string())
                .filter(|text| !text.is_empty()),
            Err(e) => {
                debug!(error = %e, "no acknowledgment after stream");
                None
            }
        };
        let _ = conn.shutdown().await;

        Ok(StreamReport {
            filename: name,
            bytes,
            frames,
            ack,
        })
    }
}

/// Fills `block` from `source`, stopping early only at end of file.
async fn read_block<R>(source: &mut R, block: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < block.len() {
        let n = source.read(&mut block[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl FileSender for TcpSender {
    fn send(&self, request: SendRequest) -> SendFuture<'_> {
        Box::pin(async move {
            let filename = request.filename.clone();
            match self.try_send(request).await {
                Ok(reply) => {
                    info!(%filename, %reply, "file sent");
                    reply_status(&reply)
                }
                Err(e) => {
                    warn!(%filename, error = %e, "send failed");
                    failure_status(&e)
                }
            }
        })
    }

    fn send_file_stream<'a>(
        &'a self,
        location: &'a Path,
        filename: Option<&'a str>,
    ) -> SendFuture<'a> {
        Box::pin(async move {
            match self.try_send_file_stream(location, filename).await {
                Ok(report) => {
                    info!(
                        filename = %report.filename,
                        bytes = report.bytes,
                        frames = report.frames,
                        "file streamed"
                    );
                    stream_status(&report.filename, report.bytes)
                }
                Err(e) => {
                    warn!(path = %location.display(), error = %e, "stream failed");
                    failure_status(&e)
                }
            }
        })
    }
}
