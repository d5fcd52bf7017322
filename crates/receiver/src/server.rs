//! Listener lifecycle.
//!
//! A [`Receiver`] owns at most one listening socket. Calling
//! [`Receiver::start`] again (for example after pairing a new session)
//! shuts the previous accept loop down before binding, and the socket is
//! created with `SO_REUSEADDR` so the same port can be taken again right
//! away.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use snapbeam_transport::{AcceptBackoff, SessionToken, Storage, Timeouts};

use crate::connection::{ConnectionContext, handle_connection};
use crate::media::MediaImporter;
use crate::state::{ReceiverStatus, TransferReport};
use crate::{DEFAULT_REPORT_CAPACITY, LISTEN_BACKLOG, ReceiveError};

/// Receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Address to bind; the port comes from [`Receiver::start`].
    pub bind_ip: IpAddr,
    pub timeouts: Timeouts,
    /// Reports buffered before new ones are dropped.
    pub report_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            timeouts: Timeouts::default(),
            report_capacity: DEFAULT_REPORT_CAPACITY,
        }
    }
}

struct ActiveListener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Accepts transfers for one session at a time.
pub struct Receiver {
    config: ReceiverConfig,
    storage: Arc<dyn Storage>,
    importer: Arc<dyn MediaImporter>,
    status: watch::Sender<ReceiverStatus>,
    active: Mutex<Option<ActiveListener>>,
}

/// Returned by [`Receiver::start`]; yields one report per connection.
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    reports: mpsc::Receiver<TransferReport>,
}

impl ReceiverHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the next finished connection. `None` once the listener
    /// is gone and every in-flight transfer has reported.
    pub async fn next_report(&mut self) -> Option<TransferReport> {
        self.reports.recv().await
    }
}

impl Receiver {
    pub fn new(storage: Arc<dyn Storage>, importer: Arc<dyn MediaImporter>) -> Self {
        Self::with_config(ReceiverConfig::default(), storage, importer)
    }

    pub fn with_config(
        config: ReceiverConfig,
        storage: Arc<dyn Storage>,
        importer: Arc<dyn MediaImporter>,
    ) -> Self {
        let (status, _) = watch::channel(ReceiverStatus::Idle);
        Self {
            config,
            storage,
            importer,
            status,
            active: Mutex::new(None),
        }
    }

    /// Current status line.
    pub fn status(&self) -> ReceiverStatus {
        self.status.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> watch::Receiver<ReceiverStatus> {
        self.status.subscribe()
    }

    /// Binds `port` (0 for an ephemeral port) and starts accepting
    /// transfers authenticated with `token`. An empty token accepts no
    /// one.
    pub async fn start(
        &self,
        port: u16,
        token: SessionToken,
    ) -> Result<ReceiverHandle, ReceiveError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            let _ = previous.task.await;
            info!("previous listener superseded");
        }

        let addr = SocketAddr::new(self.config.bind_ip, port);
        let bind_err = |source| ReceiveError::Bind { port, source };
        let listener = bind_reusable(addr).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let (reports_tx, reports_rx) = mpsc::channel(self.config.report_capacity.max(1));
        let ctx = Arc::new(ConnectionContext {
            token: Some(token).filter(|t| !t.as_str().trim().is_empty()),
            storage: Arc::clone(&self.storage),
            importer: Arc::clone(&self.importer),
            timeouts: self.config.timeouts,
            status: self.status.clone(),
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, ctx, reports_tx, cancel.clone()));
        *active = Some(ActiveListener { cancel, task });

        info!(%local_addr, "receiver listening");
        self.status.send_replace(ReceiverStatus::Listening {
            port: local_addr.port(),
        });
        Ok(ReceiverHandle {
            local_addr,
            reports: reports_rx,
        })
    }

    /// Stops accepting. Transfers already in flight run to completion.
    pub async fn stop(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.cancel.cancel();
            let _ = previous.task.await;
            info!("receiver stopped");
            self.status.send_replace(ReceiverStatus::Stopped);
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

fn bind_reusable(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    reports: mpsc::Sender<TransferReport>,
    cancel: CancellationToken,
) {
    let mut backoff = AcceptBackoff::default();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("accept loop cancelled");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        backoff.reset();
                        debug!(%peer, "connection accepted");
                        let _ = stream.set_nodelay(true);
                        let ctx = Arc::clone(&ctx);
                        let reports = reports.clone();
                        tokio::spawn(async move {
                            let report = handle_connection(stream, peer, &ctx).await;
                            if reports.try_send(report).is_err() {
                                debug!(%peer, "transfer report dropped");
                            }
                        });
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        error!(retry_in_ms = delay.as_millis() as u64, "accept error: {e}");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use snapbeam_transport::{BufferedReader, FsStorage};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    use super::*;
    use crate::media::NoImport;
    use crate::state::TransferState;

    fn receiver(dir: &Path) -> Receiver {
        Receiver::new(Arc::new(FsStorage::new(dir)), Arc::new(NoImport))
    }

    async fn send_raw(port: u16, bytes: &[u8]) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(bytes).await.unwrap();
        let mut conn = BufferedReader::new(stream);
        let mut reply = Vec::new();
        loop {
            let chunk = conn.receive_up_to(64).await.unwrap_or_default();
            if chunk.is_empty() {
                break;
            }
            reply.extend(chunk);
        }
        String::from_utf8(reply).unwrap()
    }

    #[tokio::test]
    async fn start_publishes_listening_status() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver(dir.path());
        assert_eq!(receiver.status(), ReceiverStatus::Idle);

        let handle = receiver.start(0, SessionToken::from("abc")).await.unwrap();
        let port = handle.local_addr().port();
        assert_ne!(port, 0);
        assert_eq!(receiver.status().to_string(), format!("Listening on port {port}"));

        receiver.stop().await;
        assert_eq!(receiver.status(), ReceiverStatus::Stopped);
    }

    #[tokio::test]
    async fn restart_supersedes_listener_on_same_port() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver(dir.path());

        let mut first = receiver.start(0, SessionToken::from("old")).await.unwrap();
        let port = first.local_addr().port();
        let mut second = receiver.start(port, SessionToken::from("new")).await.unwrap();
        assert_eq!(second.local_addr().port(), port);

        // The old listener is gone, so its report stream ends.
        assert!(first.next_report().await.is_none());

        let reply = send_raw(port, b"old\n").await;
        assert_eq!(reply, "REJECT\n");
        assert_eq!(second.next_report().await.unwrap().state, TransferState::Failed);

        let reply = send_raw(
            port,
            b"new\nFILENAME:n.txt\nSIZE:2\nMIME:text/plain\nENDHEADER\nhi",
        )
        .await;
        assert_eq!(reply, "ACCEPT\nOK\n");
        assert!(second.next_report().await.unwrap().succeeded());
        assert_eq!(std::fs::read(dir.path().join("n.txt")).unwrap(), b"hi");
    }

    #[tokio::test]
    async fn empty_token_rejects_empty_line() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver(dir.path());
        let mut handle = receiver.start(0, SessionToken::from("")).await.unwrap();
        let port = handle.local_addr().port();

        let reply = send_raw(port, b"\nFILENAME:e.txt\nSIZE:1\nENDHEADER\nx").await;
        assert_eq!(reply, "REJECT\n");
        let report = handle.next_report().await.unwrap();
        assert_eq!(report.state, TransferState::Failed);
        assert_eq!(
            report.error.as_deref(),
            Some("handshake rejected: no session configured")
        );
        assert!(!dir.path().join("e.txt").exists());
    }

    #[tokio::test]
    async fn slow_connection_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver(dir.path());
        let mut handle = receiver.start(0, SessionToken::from("abc")).await.unwrap();
        let port = handle.local_addr().port();

        // Authenticates and then stalls mid-header.
        let mut stalled = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stalled.write_all(b"abc\nFILENAME:slow.bin\n").await.unwrap();

        let reply = send_raw(
            port,
            b"abc\nFILENAME:fast.bin\nSIZE:3\nENDHEADER\nxyz",
        )
        .await;
        assert_eq!(reply, "ACCEPT\nOK\n");
        let report = handle.next_report().await.unwrap();
        assert_eq!(report.filename.as_deref(), Some("fast.bin"));
        drop(stalled);
    }

    #[tokio::test]
    async fn status_subscribers_see_latest_value() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver(dir.path());
        let mut status = receiver.subscribe();
        let mut handle = receiver.start(0, SessionToken::from("abc")).await.unwrap();
        let port = handle.local_addr().port();

        send_raw(port, b"abc\nFILENAME:s.txt\nSIZE:1\nENDHEADER\n!").await;
        handle.next_report().await.unwrap();

        status.changed().await.unwrap();
        assert_eq!(
            *status.borrow_and_update(),
            ReceiverStatus::Saved {
                filename: "s.txt".into()
            }
        );
    }
}
