//! Per-connection receive state machine.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use snapbeam_protocol::{MediaKind, REPLY_OK, TransferHeader, sanitize_filename};
use snapbeam_transport::wire::{read_frame_length, read_header};
use snapbeam_transport::{
    BufferedReader, SessionToken, Storage, Timeouts, TransportError, WriteSink, verify_token,
    with_timeout,
};

use crate::ReceiveError;
use crate::media::{ImportOutcome, MediaImporter};
use crate::state::{ReceiverStatus, TransferReport, TransferState};

/// Everything a connection task needs. Fixed for the lifetime of one
/// listener.
pub struct ConnectionContext {
    /// `None` rejects every peer.
    pub token: Option<SessionToken>,
    pub storage: Arc<dyn Storage>,
    pub importer: Arc<dyn MediaImporter>,
    pub timeouts: Timeouts,
    pub status: watch::Sender<ReceiverStatus>,
}

impl ConnectionContext {
    fn publish(&self, status: ReceiverStatus) {
        self.status.send_replace(status);
    }
}

/// Running record of one transfer.
struct Transfer {
    peer: SocketAddr,
    filename: Option<String>,
    visited: Vec<TransferState>,
    bytes: u64,
    path: Option<PathBuf>,
    import: ImportOutcome,
}

impl Transfer {
    fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            filename: None,
            visited: vec![TransferState::Listening, TransferState::Accepted],
            bytes: 0,
            path: None,
            import: ImportOutcome::Skipped,
        }
    }

    fn enter(&mut self, state: TransferState) {
        debug!(peer = %self.peer, ?state, "transfer state");
        self.visited.push(state);
    }

    fn finish(mut self, error: Option<String>) -> TransferReport {
        let state = if error.is_some() {
            TransferState::Failed
        } else {
            TransferState::Done
        };
        self.enter(state);
        TransferReport {
            peer: self.peer,
            filename: self.filename,
            state,
            visited: self.visited,
            bytes: self.bytes,
            path: self.path,
            import: self.import,
            error,
        }
    }
}

/// Drives one accepted connection to completion.
///
/// Never fails: every error ends up in the returned report and in the
/// status line.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    ctx: &ConnectionContext,
) -> TransferReport
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut transfer = Transfer::new(peer);
    match receive(stream, ctx, &mut transfer).await {
        Ok(()) => transfer.finish(None),
        Err(e) => {
            match &e {
                ReceiveError::Transport(TransportError::Rejected(_)) => {
                    ctx.publish(ReceiverStatus::Rejected { peer });
                }
                other => {
                    warn!(%peer, error = %other, "transfer failed");
                    ctx.publish(ReceiverStatus::Error(other.to_string()));
                }
            }
            transfer.finish(Some(e.to_string()))
        }
    }
}

async fn receive<S>(
    stream: S,
    ctx: &ConnectionContext,
    transfer: &mut Transfer,
) -> Result<(), ReceiveError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = BufferedReader::new(stream);
    conn.set_idle_timeout(Some(ctx.timeouts.idle));

    transfer.enter(TransferState::Handshaking);
    ctx.publish(ReceiverStatus::Handshaking {
        peer: transfer.peer,
    });
    with_timeout(
        ctx.timeouts.handshake,
        verify_token(&mut conn, ctx.token.as_ref()),
    )
    .await?;

    transfer.enter(TransferState::HeaderWait);
    let header = with_timeout(ctx.timeouts.handshake, read_header(&mut conn)).await?;
    let filename = sanitize_filename(&header.filename);
    transfer.filename = Some(filename.clone());

    transfer.enter(TransferState::BodyReceive);
    ctx.publish(ReceiverStatus::Receiving {
        filename: filename.clone(),
    });
    let (staged, mut sink) = ctx
        .storage
        .create_or_replace(Path::new(&filename))
        .await
        .map_err(|source| ReceiveError::Storage {
            path: filename.clone(),
            source,
        })?;
    let path = staged.destination.clone();
    transfer.path = Some(path.clone());

    let body = receive_body(&mut conn, &mut sink, &header, &mut transfer.bytes).await;
    // Commit even on failure so a partial file holds every byte received.
    let closed = sink.shutdown().await;
    drop(sink);
    let committed = ctx.storage.commit(&staged).await;
    body?;
    closed
        .and(committed)
        .map_err(|source| ReceiveError::Storage {
            path: path.display().to_string(),
            source,
        })?;

    transfer.enter(TransferState::Persisted);
    info!(%filename, bytes = transfer.bytes, path = %path.display(), "file saved");
    ctx.publish(ReceiverStatus::Saved {
        filename: filename.clone(),
    });

    let reply = format!("{REPLY_OK}\n");
    if let Err(e) = write_reply(&mut conn, reply.as_bytes()).await {
        debug!(%filename, error = %e, "could not deliver reply");
    }

    let kind = MediaKind::from_mime(&header.mime);
    if kind.is_media() {
        transfer.enter(TransferState::MediaImport);
        let outcome = ctx
            .importer
            .import_to_library(&path, kind == MediaKind::Video)
            .await;
        match &outcome {
            ImportOutcome::Imported(dest) => {
                info!(%filename, dest = %dest.display(), "imported to library");
                ctx.publish(ReceiverStatus::Imported { filename });
            }
            ImportOutcome::Failed(reason) => {
                warn!(%filename, %reason, "media import failed");
                ctx.publish(ReceiverStatus::ImportFailed {
                    filename,
                    reason: reason.clone(),
                });
            }
            ImportOutcome::Skipped => {}
        }
        transfer.import = outcome;
    }
    Ok(())
}

async fn receive_body<S>(
    conn: &mut BufferedReader<S>,
    sink: &mut WriteSink,
    header: &TransferHeader,
    bytes: &mut u64,
) -> Result<(), ReceiveError>
where
    S: AsyncRead + Unpin,
{
    if !header.chunked {
        return match conn.receive_exact(sink, header.size).await {
            Ok(n) => {
                *bytes = n;
                Ok(())
            }
            Err(TransportError::Truncated { written, expected }) => {
                *bytes = written;
                Err(ReceiveError::FileTruncated { written, expected })
            }
            Err(e) => Err(e.into()),
        };
    }

    loop {
        let len = match read_frame_length(conn).await {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(()),
            Err(TransportError::UnexpectedEndOfStream) => {
                return Err(ReceiveError::StreamEnded { written: *bytes });
            }
            Err(e) => return Err(e.into()),
        };
        match conn.receive_exact(sink, u64::from(len)).await {
            Ok(n) => *bytes += n,
            Err(TransportError::Truncated { written, .. }) => {
                *bytes += written;
                return Err(ReceiveError::StreamEnded { written: *bytes });
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn write_reply<S>(conn: &mut BufferedReader<S>, reply: &[u8]) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    conn.write_all(reply).await?;
    conn.shutdown().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use snapbeam_transport::FsStorage;
    use tokio::io::{AsyncReadExt, DuplexStream};

    use super::*;
    use crate::media::{ImportFuture, LibraryImporter, NoImport};

    struct FailingImporter;

    impl MediaImporter for FailingImporter {
        fn import_to_library<'a>(&'a self, _: &'a Path, _: bool) -> ImportFuture<'a> {
            Box::pin(async { ImportOutcome::Failed("library locked".into()) })
        }
    }

    fn context(dir: &Path, importer: Arc<dyn MediaImporter>) -> ConnectionContext {
        let (status, _) = watch::channel(ReceiverStatus::Idle);
        ConnectionContext {
            token: Some(SessionToken::from("T1")),
            storage: Arc::new(FsStorage::new(dir)),
            importer,
            timeouts: Timeouts::default(),
            status,
        }
    }

    fn peer() -> SocketAddr {
        "192.168.1.20:51000".parse().unwrap()
    }

    /// Runs the server side against a client that writes `request` in one
    /// go, then closes its write half. Returns the report and everything
    /// the server wrote back.
    async fn exchange(ctx: &ConnectionContext, request: &[u8]) -> (TransferReport, String) {
        let (client, server) = tokio::io::duplex(1 << 20);
        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        client_wr.write_all(request).await.unwrap();
        client_wr.shutdown().await.unwrap();

        let report = handle_connection(server, peer(), ctx).await;
        let mut reply = Vec::new();
        client_rd.read_to_end(&mut reply).await.unwrap();
        (report, String::from_utf8(reply).unwrap())
    }

    fn sized_request(token: &str, name: &str, mime: &str, body: &[u8]) -> Vec<u8> {
        let mut out = format!("{token}\n").into_bytes();
        out.extend(TransferHeader::sized(name, body.len() as u64, mime).encode());
        out.extend_from_slice(body);
        out
    }

    fn chunked_request(token: &str, name: &str, chunks: &[&[u8]], eof: bool) -> Vec<u8> {
        let mut out = format!("{token}\n").into_bytes();
        out.extend(TransferHeader::chunked(name, "application/octet-stream").encode());
        for chunk in chunks {
            out.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            out.extend_from_slice(chunk);
        }
        if eof {
            out.extend_from_slice(&[0, 0, 0, 0]);
        }
        out
    }

    #[tokio::test]
    async fn sized_body_is_persisted_and_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(NoImport));

        let request = sized_request("T1", "a.bin", "application/octet-stream", b"12345");
        let (report, reply) = exchange(&ctx, &request).await;

        assert_eq!(reply, "ACCEPT\nOK\n");
        assert_eq!(report.state, TransferState::Done);
        assert_eq!(
            report.visited,
            vec![
                TransferState::Listening,
                TransferState::Accepted,
                TransferState::Handshaking,
                TransferState::HeaderWait,
                TransferState::BodyReceive,
                TransferState::Persisted,
                TransferState::Done,
            ]
        );
        assert_eq!(report.bytes, 5);
        assert_eq!(report.import, ImportOutcome::Skipped);
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"12345");
        assert_eq!(*ctx.status.borrow(), ReceiverStatus::Saved { filename: "a.bin".into() });
    }

    #[tokio::test]
    async fn wrong_token_is_rejected_before_any_header_read() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(NoImport));

        let request = sized_request("T2", "a.bin", "application/octet-stream", b"12345");
        let (report, reply) = exchange(&ctx, &request).await;

        assert_eq!(reply, "REJECT\n");
        assert_eq!(report.state, TransferState::Failed);
        assert!(!report.visited.contains(&TransferState::HeaderWait));
        assert!(report.filename.is_none());
        assert!(!dir.path().join("a.bin").exists());
        assert_eq!(*ctx.status.borrow(), ReceiverStatus::Rejected { peer: peer() });
    }

    #[tokio::test]
    async fn missing_token_rejects_every_peer() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), Arc::new(NoImport));
        ctx.token = None;

        let request = sized_request("", "a.bin", "application/octet-stream", b"12345");
        let (report, reply) = exchange(&ctx, &request).await;

        assert_eq!(reply, "REJECT\n");
        assert_eq!(report.state, TransferState::Failed);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(*ctx.status.borrow(), ReceiverStatus::Rejected { peer: peer() });
    }

    #[tokio::test]
    async fn invalid_header_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(NoImport));

        let request = b"T1\nFILENAME:a.bin\nSIZE:0\nENDHEADER\n".to_vec();
        let (report, reply) = exchange(&ctx, &request).await;

        assert_eq!(reply, "ACCEPT\n");
        assert_eq!(report.state, TransferState::Failed);
        assert!(!report.visited.contains(&TransferState::BodyReceive));
        assert!(report.error.unwrap().starts_with("invalid header"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn short_body_reports_truncation_and_keeps_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(NoImport));

        let mut request = b"T1\n".to_vec();
        request.extend(TransferHeader::sized("part.bin", 100, "application/octet-stream").encode());
        request.extend_from_slice(&[7u8; 60]);
        let (report, _) = exchange(&ctx, &request).await;

        assert_eq!(report.state, TransferState::Failed);
        assert_eq!(
            report.error.as_deref(),
            Some("File truncated: wrote 60 of 100 bytes")
        );
        assert_eq!(report.bytes, 60);
        assert_eq!(std::fs::read(dir.path().join("part.bin")).unwrap(), vec![7u8; 60]);
        assert_eq!(
            ctx.status.borrow().to_string(),
            "Error: File truncated: wrote 60 of 100 bytes"
        );
    }

    #[tokio::test]
    async fn chunked_frames_are_concatenated_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(NoImport));

        let a = vec![b'a'; 4096];
        let b = vec![b'b'; 4096];
        let c = vec![b'c'; 17];
        let request = chunked_request("T1", "joined.bin", &[&a, &b, &c], true);
        let (report, reply) = exchange(&ctx, &request).await;

        assert_eq!(reply, "ACCEPT\nOK\n");
        assert_eq!(report.state, TransferState::Done);
        assert_eq!(report.bytes, 4096 + 4096 + 17);
        let expected: Vec<u8> = [a, b, c].concat();
        assert_eq!(std::fs::read(dir.path().join("joined.bin")).unwrap(), expected);
    }

    #[tokio::test]
    async fn chunked_stream_without_eof_frame_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(NoImport));

        let request = chunked_request("T1", "cut.bin", &[b"hello", b"world"], false);
        let (report, _) = exchange(&ctx, &request).await;

        assert_eq!(report.state, TransferState::Failed);
        assert_eq!(
            report.error.as_deref(),
            Some("stream ended before EOF frame after 10 bytes")
        );
        assert_eq!(std::fs::read(dir.path().join("cut.bin")).unwrap(), b"helloworld");
    }

    #[tokio::test]
    async fn same_name_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dup.txt"), b"old content that is longer").unwrap();
        let ctx = context(dir.path(), Arc::new(NoImport));

        let request = sized_request("T1", "dup.txt", "text/plain", b"new");
        let (report, _) = exchange(&ctx, &request).await;

        assert!(report.succeeded());
        assert_eq!(std::fs::read(dir.path().join("dup.txt")).unwrap(), b"new");
    }

    /// Waits until some in-progress transfer has flushed bytes to its
    /// staging file.
    async fn wait_for_staged_bytes(dir: &Path) {
        loop {
            let started = std::fs::read_dir(dir).unwrap().filter_map(Result::ok).any(|entry| {
                entry.file_name().to_string_lossy().ends_with(".part")
                    && entry.metadata().map(|m| m.len() > 0).unwrap_or(false)
            });
            if started {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn overlapping_same_name_transfers_keep_last_finisher_intact() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(NoImport));
        let total = 600_000usize;
        let sent_first = 400_000usize;

        let (client, server) = tokio::io::duplex(1 << 20);
        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        let slow = handle_connection(server, peer(), &ctx);
        let driver = async {
            let mut request = b"T1\n".to_vec();
            request.extend(
                TransferHeader::sized("same.bin", total as u64, "application/octet-stream")
                    .encode(),
            );
            request.extend(vec![b'A'; sent_first]);
            client_wr.write_all(&request).await.unwrap();
            wait_for_staged_bytes(dir.path()).await;

            let quick = sized_request("T1", "same.bin", "application/octet-stream", b"BBB");
            let (report, reply) = exchange(&ctx, &quick).await;
            assert!(report.succeeded());
            assert_eq!(reply, "ACCEPT\nOK\n");
            assert_eq!(std::fs::read(dir.path().join("same.bin")).unwrap(), b"BBB");

            client_wr.write_all(&vec![b'A'; total - sent_first]).await.unwrap();
            client_wr.shutdown().await.unwrap();
            let mut reply = Vec::new();
            client_rd.read_to_end(&mut reply).await.unwrap();
            String::from_utf8(reply).unwrap()
        };
        let (report, reply) = tokio::join!(slow, driver);

        assert_eq!(reply, "ACCEPT\nOK\n");
        assert!(report.succeeded());
        assert_eq!(report.bytes, total as u64);
        assert_eq!(report.path, Some(dir.path().join("same.bin")));
        assert_eq!(std::fs::read(dir.path().join("same.bin")).unwrap(), vec![b'A'; total]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn image_is_imported_after_reply() {
        let dir = tempfile::tempdir().unwrap();
        let library = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(LibraryImporter::new(library.path())));

        let request = sized_request("T1", "photo.jpg", "image/jpeg", b"jpegdata");
        let (report, reply) = exchange(&ctx, &request).await;

        assert_eq!(reply, "ACCEPT\nOK\n");
        assert!(report.visited.contains(&TransferState::MediaImport));
        let dest = library.path().join("Pictures/photo.jpg");
        assert_eq!(report.import, ImportOutcome::Imported(dest.clone()));
        assert_eq!(std::fs::read(dest).unwrap(), b"jpegdata");
        assert!(dir.path().join("photo.jpg").exists());
        assert_eq!(
            ctx.status.borrow().to_string(),
            "Imported photo.jpg to library"
        );
    }

    #[tokio::test]
    async fn import_failure_keeps_file_and_transfer_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(FailingImporter));

        let request = sized_request("T1", "clip.mp4", "video/mp4", b"mp4data");
        let (report, _) = exchange(&ctx, &request).await;

        assert_eq!(report.state, TransferState::Done);
        assert_eq!(report.import, ImportOutcome::Failed("library locked".into()));
        assert_eq!(std::fs::read(dir.path().join("clip.mp4")).unwrap(), b"mp4data");
        assert_eq!(
            ctx.status.borrow().to_string(),
            "Saved clip.mp4; import failed: library locked"
        );
    }

    #[tokio::test]
    async fn hostile_filename_stays_inside_save_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(NoImport));

        let request = sized_request("T1", "../../escape.txt", "text/plain", b"x");
        let (report, _) = exchange(&ctx, &request).await;

        assert_eq!(report.filename.as_deref(), Some("_.._escape.txt"));
        assert!(dir.path().join("_.._escape.txt").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out_in_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(NoImport));
        let (_client, server): (DuplexStream, DuplexStream) = tokio::io::duplex(64);

        let report = handle_connection(server, peer(), &ctx).await;
        assert_eq!(report.state, TransferState::Failed);
        assert_eq!(report.error.as_deref(), Some("timed out"));
        assert_eq!(report.visited.last(), Some(&TransferState::Failed));
    }
}
