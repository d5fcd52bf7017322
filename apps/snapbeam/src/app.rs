//! Application orchestrator: wires the library crates to each subcommand.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use snapbeam_receiver::{
    LibraryImporter, MediaImporter, NoImport, Receiver, ReceiverConfig, TransferReport,
};
use snapbeam_sender::{MediaSource, StagingPolicy, send_all};
use snapbeam_session::{
    ClientIdentity, Connector, PairingServer, SessionStore, local_lan_address, render_qr,
};
use snapbeam_transport::{FsStorage, SessionToken};

use crate::cli::{Cli, Command};
use crate::config::{Config, sessions_path};

/// Runs one subcommand to completion.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Command::Receive { .. } => receive(config).await,
        Command::Pair { qr } => pair(&config, &qr).await,
        Command::Send { session, files } => send(&config, session, files).await,
        Command::Sessions { forget } => sessions(&config, forget),
    }
}

async fn receive(config: Config) -> anyhow::Result<()> {
    let save_dir = config.save_dir_path();
    let timeouts = config.timeouts.to_timeouts();
    let importer: Arc<dyn MediaImporter> = match config.library_path() {
        Some(dir) => Arc::new(LibraryImporter::new(dir)),
        None => Arc::new(NoImport),
    };
    let receiver = Receiver::with_config(
        ReceiverConfig {
            timeouts,
            ..ReceiverConfig::default()
        },
        Arc::new(FsStorage::new(&save_dir)),
        importer,
    );

    let token = SessionToken::generate();
    let mut handle = receiver.start(config.transfer_port, token.clone()).await?;
    let transfer_port = handle.local_addr().port();

    let host = match local_lan_address() {
        Some(ip) => ip.to_string(),
        None => {
            tracing::warn!("no LAN address found, advertising loopback");
            Ipv4Addr::LOCALHOST.to_string()
        }
    };
    let pairing = Arc::new(
        PairingServer::new(config.name.clone(), host, transfer_port, token)
            .with_timeout(timeouts.handshake),
    );
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.pairing_port))
        .await
        .with_context(|| format!("cannot listen on pairing port {}", config.pairing_port))?;
    let pairing_port = listener.local_addr()?.port();

    let payload = pairing.qr_payload(pairing_port).to_json()?;
    println!("{}", render_qr(&payload)?);
    println!("{payload}");
    println!(
        "Receiving on port {transfer_port}, saving to {}",
        save_dir.display()
    );

    let cancel = CancellationToken::new();
    let (paired_tx, mut paired_rx) = mpsc::channel(8);
    tokio::spawn(Arc::clone(&pairing).serve(listener, cancel.clone(), paired_tx));

    let mut status = receiver.subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            Some(client) = paired_rx.recv() => {
                println!("Paired with {} ({})", client.client_name, client.peer);
            }
            Some(report) = handle.next_report() => print_report(&report),
            Ok(()) = status.changed() => {
                let line = status.borrow_and_update().to_string();
                tracing::debug!(status = %line, "receiver status");
            }
        }
    }

    cancel.cancel();
    receiver.stop().await;
    Ok(())
}

fn print_report(report: &TransferReport) {
    let name = report.filename.as_deref().unwrap_or("<no header>");
    match &report.error {
        None => println!("{name}: saved {} bytes from {}", report.bytes, report.peer),
        Some(error) => println!("{name}: failed from {}: {error}", report.peer),
    }
}

fn connector(config: &Config) -> anyhow::Result<Connector> {
    let store = Arc::new(SessionStore::new(sessions_path()?)?);
    let identity = ClientIdentity::new(config.name.clone(), config.device_id.clone());
    Ok(Connector::new(identity, store).with_timeouts(config.timeouts.to_timeouts()))
}

async fn pair(config: &Config, qr: &str) -> anyhow::Result<()> {
    let session = connector(config)?.pair(qr).await?;
    println!(
        "Paired with {} at {}:{} (session {})",
        session.name, session.host, session.port, session.session_id
    );
    Ok(())
}

async fn send(
    config: &Config,
    session: Option<String>,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let connector = connector(config)?;
    let session_id = match session {
        Some(id) => id,
        None => connector
            .sessions()
            .first()
            .map(|s| s.session_id.clone())
            .context("no saved sessions; run `snapbeam pair` first")?,
    };
    let sender = connector.sender_for(&session_id)?;

    let policy = StagingPolicy::new(config.memory_limit_bytes);
    let total = files.len();
    let mut failed = 0usize;
    let mut payloads = Vec::with_capacity(total);
    for file in files {
        let label = file.display().to_string();
        match policy.stage(MediaSource::new(file)).await {
            Ok(payload) => payloads.push(payload),
            Err(e) => {
                println!("{label}: Send failed: {e}");
                failed += 1;
            }
        }
    }

    for outcome in send_all(Arc::new(sender), payloads).await {
        println!("{}: {}", outcome.label, outcome.status);
        if !outcome.succeeded() {
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} file(s) failed");
    }
    Ok(())
}

fn sessions(config: &Config, forget: Option<String>) -> anyhow::Result<()> {
    let connector = connector(config)?;
    if let Some(id) = forget {
        if connector.forget(&id)? {
            println!("Forgot session {id}");
        } else {
            anyhow::bail!("no session with id {id}");
        }
        return Ok(());
    }

    let sessions = connector.sessions();
    if sessions.is_empty() {
        println!("No saved sessions.");
    }
    for s in sessions {
        println!(
            "{}  {}  {}:{}  paired {}",
            s.session_id,
            s.name,
            s.host,
            s.port,
            s.paired_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
