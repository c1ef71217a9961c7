//! Stand-in Peer Server
//!
//! Plays the chat client's side of the presence channel on a Unix socket:
//! - Accepts connections and answers the handshake with `READY`
//!   (or rejects an unexpected application id with code 4000)
//! - Logs every `SET_ACTIVITY` and keeps the latest activity
//! - Answers `Ping` with `Pong`, ends the connection on `Close`
//!
//! ```text
//!   presence client                 PeerServer
//!        │ ── Handshake {v, client_id} ──► │
//!        │ ◄──────── Frame READY ───────── │
//!        │ ── Frame SET_ACTIVITY ────────► │  log + remember
//!        │ ◄──────── Frame (echo) ──────── │
//!        │ ── Close ─────────────────────► │
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, info, warn, Instrument};

use presence_core::protocol::{Handshake, PeerError, Response, INVALID_CLIENT_ID};
use presence_core::transport::{encode, Frame, FrameDecoder, Opcode};

/// How the peer treats incoming sessions
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// User name reported in `READY`
    pub username: String,
    /// Only this application id is accepted (None = accept any)
    pub expected_client_id: Option<String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            username: "presence-peer".to_string(),
            expected_client_id: None,
        }
    }
}

/// Counters and the latest activity, shared with callers
#[derive(Debug, Default)]
pub struct PeerStats {
    /// Sessions that completed the handshake
    pub sessions: AtomicUsize,
    /// Handshakes rejected for a wrong application id
    pub rejected: AtomicUsize,
    /// `SET_ACTIVITY` commands received
    pub updates: AtomicUsize,
    /// Activity from the latest `SET_ACTIVITY` (None after a clear)
    pub current_activity: RwLock<Option<serde_json::Value>>,
}

/// The stand-in peer
pub struct PeerServer {
    socket_path: PathBuf,
    listener: UnixListener,
    config: Arc<PeerConfig>,
    stats: Arc<PeerStats>,
}

impl PeerServer {
    /// Bind the socket (removing a stale one)
    pub fn bind(socket_path: PathBuf, config: PeerConfig) -> Result<Self> {
        prepare_socket(&socket_path)?;
        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind to {socket_path:?}"))?;
        info!(path = ?socket_path, "Listening for presence clients");

        Ok(Self {
            socket_path,
            listener,
            config: Arc::new(config),
            stats: Arc::new(PeerStats::default()),
        })
    }

    /// Shared statistics
    pub fn stats(&self) -> Arc<PeerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections until `shutdown` is set
    pub async fn run(self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let mut next_id = 0usize;

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping accept loop");
                break;
            }

            // Accept with timeout to allow checking the shutdown flag
            let accept_result =
                tokio::time::timeout(Duration::from_millis(100), self.listener.accept()).await;

            let stream = match accept_result {
                Ok(Ok((stream, _addr))) => stream,
                Ok(Err(e)) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(_) => continue,
            };

            next_id += 1;
            let config = Arc::clone(&self.config);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(
                handle_connection(stream, config, stats)
                    .instrument(tracing::info_span!("client", id = next_id)),
            );
        }

        if let Err(e) = fs::remove_file(&self.socket_path) {
            debug!(error = %e, "Socket file already gone");
        }
        Ok(())
    }
}

/// Create the parent directory and remove a stale socket file
fn prepare_socket(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
        }
    }
    if path.exists() {
        warn!(path = ?path, "Removing stale socket file");
        fs::remove_file(path).with_context(|| format!("Failed to remove stale socket: {path:?}"))?;
    }
    Ok(())
}

async fn write_frame<T: serde::Serialize>(
    stream: &mut UnixStream,
    opcode: Opcode,
    payload: &T,
) -> Result<()> {
    let bytes = encode(opcode, payload)?;
    stream.write_all(&bytes).await?;
    Ok(())
}

/// Read the next complete frame; `None` on EOF
async fn read_frame(stream: &mut UnixStream, decoder: &mut FrameDecoder) -> Result<Option<Frame>> {
    let mut buf = vec![0u8; 8192];
    loop {
        if let Some(frame) = decoder.decode()? {
            return Ok(Some(frame));
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        decoder.push(&buf[..n]);
    }
}

async fn handle_connection(mut stream: UnixStream, config: Arc<PeerConfig>, stats: Arc<PeerStats>) {
    if let Err(e) = serve(&mut stream, &config, &stats).await {
        warn!(error = %e, "Connection ended with error");
    }
    debug!("Connection handler finished");
}

async fn serve(stream: &mut UnixStream, config: &PeerConfig, stats: &PeerStats) -> Result<()> {
    let mut decoder = FrameDecoder::new();

    let Some(first) = read_frame(stream, &mut decoder).await? else {
        debug!("Client left before the handshake");
        return Ok(());
    };
    if first.opcode != Opcode::Handshake {
        anyhow::bail!("Expected a handshake, got {:?}", first.opcode);
    }
    let handshake: Handshake = first.json()?;

    if let Some(expected) = &config.expected_client_id {
        if &handshake.client_id != expected {
            warn!(client_id = %handshake.client_id, "Rejecting unknown application id");
            stats.rejected.fetch_add(1, Ordering::SeqCst);
            let body = PeerError {
                code: INVALID_CLIENT_ID,
                message: "Invalid Client ID".to_string(),
            };
            write_frame(stream, Opcode::Close, &body).await?;
            return Ok(());
        }
    }

    write_frame(
        stream,
        Opcode::Frame,
        &Response::ready(Some(std::process::id()), &config.username),
    )
    .await?;
    stats.sessions.fetch_add(1, Ordering::SeqCst);
    info!(client_id = %handshake.client_id, v = handshake.v, "Handshake accepted");

    while let Some(frame) = read_frame(stream, &mut decoder).await? {
        match frame.opcode {
            Opcode::Frame => {
                let command: serde_json::Value = frame.json()?;
                let activity = command.pointer("/args/activity").cloned();
                match &activity {
                    Some(activity) => info!(
                        details = %activity["details"],
                        state = %activity["state"],
                        pid = %command["args"]["pid"],
                        "Activity set"
                    ),
                    None => info!(pid = %command["args"]["pid"], "Activity cleared"),
                }
                stats.updates.fetch_add(1, Ordering::SeqCst);
                *stats.current_activity.write().await = activity.clone();

                let reply = Response {
                    cmd: command["cmd"].as_str().map(str::to_string),
                    evt: None,
                    data: activity,
                    nonce: command["nonce"].as_str().map(str::to_string),
                };
                write_frame(stream, Opcode::Frame, &reply).await?;
            }
            Opcode::Ping => {
                let pong = Frame {
                    opcode: Opcode::Pong,
                    payload: frame.payload,
                };
                stream.write_all(&pong.to_bytes()?).await?;
            }
            Opcode::Close => {
                info!("Client closed the session");
                break;
            }
            Opcode::Handshake | Opcode::Pong => {
                debug!(opcode = ?frame.opcode, "Ignoring frame");
            }
        }
    }

    Ok(())
}
