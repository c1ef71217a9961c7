//! Presence Peer - Local Stand-in and Probe for presence-core
//!
//! Two tools for exercising the presence client without the real chat
//! client installed:
//!
//! - `listen` runs a stand-in peer on a Unix socket. It accepts the
//!   handshake, logs every status it receives, and answers pings.
//! - `probe` runs the full presence service once against whatever peer is
//!   reachable (real or stand-in) and reports what happened.
//!
//! # Usage
//!
//! ```bash
//! # Stand-in peer on the first default endpoint
//! presence-peer listen
//!
//! # Stand-in peer that only accepts one application id
//! presence-peer listen --socket /tmp/ipc-test/discord-ipc-0 --expect-client-id 674448359850901546
//!
//! # Push one status through the full service
//! presence-peer probe --endpoint /tmp/ipc-test/discord-ipc-0 --file scene.blend
//!
//! # Verbose logging
//! RUST_LOG=debug presence-peer listen
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: stop the stand-in peer

#[cfg(unix)]
mod server;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use presence_core::{
    load_config_from_path, FrameRange, HostVersion, PidFileMarker, PresenceService,
    StaticHostInfo, TickAction,
};

/// Presence Peer - stand-in chat client and probe for presence-core
#[derive(Parser, Debug)]
#[command(name = "presence-peer")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "PRESENCE_PEER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a stand-in peer that accepts presence clients
    Listen {
        /// Socket path (defaults to the first endpoint the client searches)
        #[arg(short = 's', long, env = "PRESENCE_PEER_SOCKET", value_name = "PATH")]
        socket: Option<PathBuf>,

        /// User name reported in the handshake reply
        #[arg(long, default_value = "presence-peer")]
        username: String,

        /// Reject every other application id with code 4000
        #[arg(long, value_name = "ID")]
        expect_client_id: Option<String>,
    },

    /// Connect, send one status, and disconnect
    Probe {
        /// Configuration file path
        #[arg(short = 'c', long, env = "PRESENCE_CONFIG", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Connect only to this endpoint
        #[arg(short = 'e', long, value_name = "PATH")]
        endpoint: Option<PathBuf>,

        /// File name to report (omit for an unsaved file)
        #[arg(short = 'f', long)]
        file: Option<String>,

        /// Internal render engine identifier
        #[arg(long, default_value = "BLENDER_EEVEE_NEXT")]
        engine: String,

        /// Host version as MAJOR.MINOR
        #[arg(long, default_value = "4.2")]
        host_version: String,
    },
}

/// Parse `MAJOR.MINOR` into a release version
fn parse_host_version(raw: &str) -> Result<HostVersion> {
    let (major, minor) = raw
        .split_once('.')
        .with_context(|| format!("Expected MAJOR.MINOR, got {raw:?}"))?;
    Ok(HostVersion::new(
        major.parse().context("Invalid major version")?,
        minor.parse().context("Invalid minor version")?,
        "release",
    ))
}

/// Set `shutdown` on SIGTERM or SIGINT
fn spawn_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, initiating shutdown"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Received SIGINT, initiating shutdown");
                    }
                }
            }
        }
        #[cfg(not(unix))]
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, initiating shutdown");
        }

        shutdown.store(true, Ordering::SeqCst);
    });
}

#[cfg(unix)]
async fn listen(
    socket: Option<PathBuf>,
    username: String,
    expect_client_id: Option<String>,
) -> Result<()> {
    let socket_path = match socket {
        Some(path) => path,
        None => presence_core::transport::default_candidates()
            .into_iter()
            .next()
            .context("No default endpoint; pass --socket")?,
    };
    info!(socket_path = ?socket_path, "Socket path");

    let config = server::PeerConfig {
        username,
        expected_client_id: expect_client_id,
    };
    let server = server::PeerServer::bind(socket_path, config)?;
    let stats = server.stats();

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(Arc::clone(&shutdown));

    let result = server.run(shutdown).await;

    info!(
        sessions = stats.sessions.load(Ordering::SeqCst),
        rejected = stats.rejected.load(Ordering::SeqCst),
        updates = stats.updates.load(Ordering::SeqCst),
        "Stand-in peer stopped"
    );
    result
}

#[cfg(not(unix))]
async fn listen(
    _socket: Option<PathBuf>,
    _username: String,
    _expect_client_id: Option<String>,
) -> Result<()> {
    anyhow::bail!("The stand-in peer needs Unix domain sockets")
}

/// Run the service through start, one update and stop
fn probe(
    config_path: Option<PathBuf>,
    endpoint: Option<PathBuf>,
    host: StaticHostInfo,
) -> Result<TickAction> {
    let mut config = load_config_from_path(config_path)?;
    info!(source = %config.source(), "Configuration loaded");

    if endpoint.is_some() {
        config.connect.endpoint = endpoint;
    }
    // The probe exists to be watched
    config.options.logging_enabled = true;

    let marker = PidFileMarker::new(config.marker.resolved_path());
    let mut service = PresenceService::from_config(&config, marker, config.options.clone());

    service.start();
    service.client().join_worker();

    let outcome = service.send_test_update(&host);
    if let Some(peer) = service.client().peer() {
        info!(username = ?peer.username, process_id = ?peer.process_id, "Peer");
    }
    service.stop();

    Ok(outcome.action)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    presence_core::init_logging(&args.log_level, &["presence_peer"])
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;
    presence_core::set_logging_enabled(true);

    info!("Presence peer starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    match args.command {
        Command::Listen {
            socket,
            username,
            expect_client_id,
        } => listen(socket, username, expect_client_id).await,

        Command::Probe {
            config,
            endpoint,
            file,
            engine,
            host_version,
        } => {
            let host = StaticHostInfo {
                file_name: file,
                render_engine: engine,
                frame_range: FrameRange {
                    start: 1,
                    end: 250,
                    current: 1,
                },
                version: parse_host_version(&host_version)?,
            };

            // The service blocks on its connect worker
            let action = tokio::task::spawn_blocking(move || probe(config, endpoint, host))
                .await
                .context("Probe task panicked")??;

            match &action {
                TickAction::Updated(snapshot) => {
                    info!(details = %snapshot.details, state = %snapshot.state, "Status sent");
                    Ok(())
                }
                TickAction::ClearedForOtherOwner { owner } => {
                    warn!(owner, "Another host process owns the status");
                    Ok(())
                }
                TickAction::NotConnected { .. } => {
                    error!("No peer accepted the connection");
                    anyhow::bail!("Probe could not connect")
                }
            }
        }
    }
}
