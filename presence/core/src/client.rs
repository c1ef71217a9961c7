//! Presence Client
//!
//! The public face of the crate: `connect`, `update`, `clear`, `close`.
//! None of these return errors to the host. Failures are classified, logged
//! and leave the client in a safe disconnected or failed state.
//!
//! # Threads
//!
//! ```text
//!  primary loop                      presence-connect worker
//!  ────────────                      ───────────────────────
//!  connect() ──spawn──────────────►  Session::establish (retry + backoff)
//!  update()  ─┐                              │
//!  clear()   ─┼── lock ── Option<Session> ◄──┘ swap in when Ready
//!  close()   ─┘  (join worker first)
//! ```
//!
//! The worker builds its session outside the lock, so `update` never waits on
//! a connection attempt. `close` flags the client as stopped before joining,
//! and a worker that finishes afterwards drops its session instead of
//! installing it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::activity::StatusSnapshot;
use crate::config::{ConnectConfig, PresenceConfig};
use crate::error::{ErrorKind, PresenceError};
use crate::protocol::PeerInfo;
use crate::session::{Phase, Session};
use crate::transport::Connector;

/// Name of the background connect thread
pub const CONNECT_THREAD_NAME: &str = "presence-connect";

/// State shared between the primary loop and the connect worker
#[derive(Debug, Default)]
struct Shared {
    session: Mutex<Option<Session>>,
    stopped: AtomicBool,
}

/// Everything a connection attempt needs, cloneable into the worker
#[derive(Clone)]
struct Attempt {
    connector: Arc<dyn Connector>,
    connect: ConnectConfig,
    application_id: String,
    support_url: String,
    shared: Arc<Shared>,
}

impl Attempt {
    /// Bounded retry loop; installs the session on success
    fn run(&self) -> Result<(), PresenceError> {
        let attempts = self.connect.attempts.max(1);

        for attempt in 1..=attempts {
            if self.shared.stopped.load(Ordering::SeqCst) {
                tracing::debug!("Client stopped; abandoning connection attempt");
                return Err(PresenceError::Closed);
            }

            match Session::establish(
                self.connector.as_ref(),
                &self.application_id,
                self.connect.handshake_timeout(),
            ) {
                Ok(session) => {
                    self.install(session);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        error = %e,
                        "Connection failed"
                    );
                    std::thread::sleep(self.connect.backoff(attempt));
                }
                Err(e) => {
                    self.log_abort(&e);
                    return Err(e);
                }
            }
        }

        // attempts >= 1, so the loop always returns
        Err(PresenceError::NotFound)
    }

    fn install(&self, session: Session) {
        let mut slot = self.shared.session.lock();
        if self.shared.stopped.load(Ordering::SeqCst) {
            tracing::debug!("Client stopped while connecting; discarding session");
            drop(slot);
            let mut session = session;
            session.close();
            return;
        }
        if let Some(mut old) = slot.replace(session) {
            old.close();
        }
        tracing::info!(peer_pid = ?slot.as_ref().and_then(|s| s.peer().process_id), "Connected to peer");
    }

    fn log_abort(&self, err: &PresenceError) {
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::Timeout | ErrorKind::Closed => {
                tracing::warn!(error = %err, "Peer not reachable; connection aborted");
            }
            ErrorKind::InvalidIdentifier => {
                tracing::error!(
                    error = %err,
                    application_id = %self.application_id,
                    support = %self.support_url,
                    "Application identifier rejected; please report this"
                );
            }
            ErrorKind::PermissionDenied => {
                tracing::warn!(error = %err, "Invalid IPC endpoint; connection aborted");
            }
            ErrorKind::Rejected | ErrorKind::Malformed => {
                tracing::warn!(error = %err, "Peer refused the session; connection aborted");
            }
            ErrorKind::BrokenPipe | ErrorKind::InvalidState | ErrorKind::Other => {
                tracing::warn!(error = %err, "Unexpected connection error; connection aborted");
            }
        }
    }
}

/// Long-lived handle to the presence peer
pub struct PresenceClient {
    attempt: Attempt,
    worker: Mutex<Option<JoinHandle<()>>>,
    pid: u32,
}

impl std::fmt::Debug for PresenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceClient")
            .field("application_id", &self.attempt.application_id)
            .field("phase", &self.phase())
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl PresenceClient {
    /// Client talking through `connector`
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: &PresenceConfig) -> Self {
        Self {
            attempt: Attempt {
                connector,
                connect: config.connect.clone(),
                application_id: config.application_id.clone(),
                support_url: config.support_url.clone(),
                shared: Arc::new(Shared::default()),
            },
            worker: Mutex::new(None),
            pid: std::process::id(),
        }
    }

    /// Client using the configured endpoint (or discovery)
    #[must_use]
    pub fn from_config(config: &PresenceConfig) -> Self {
        Self::new(Arc::new(config.connector()), config)
    }

    /// Process id reported in every update
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current session phase (`Disconnected` when there is no session)
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.attempt
            .shared
            .session
            .lock()
            .as_ref()
            .map_or(Phase::Disconnected, Session::phase)
    }

    /// Whether updates will be sent
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Ready
    }

    /// Peer details from the current session
    #[must_use]
    pub fn peer(&self) -> Option<PeerInfo> {
        self.attempt
            .shared
            .session
            .lock()
            .as_ref()
            .map(|s| s.peer().clone())
    }

    /// Whether a connect worker is still running
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start a connection attempt in the background
    ///
    /// No-op while `Ready` or while a previous attempt is still running.
    pub fn connect(&self) {
        if self.is_ready() {
            tracing::trace!("Already connected; connect() ignored");
            return;
        }

        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            if !handle.is_finished() {
                tracing::trace!("Connection attempt already running");
                *worker = Some(handle);
                return;
            }
            let _ = handle.join();
        }

        self.attempt.shared.stopped.store(false, Ordering::SeqCst);
        let attempt = self.attempt.clone();
        let spawned = std::thread::Builder::new()
            .name(CONNECT_THREAD_NAME.to_string())
            .spawn(move || {
                let _ = attempt.run();
            });

        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => tracing::warn!(error = %e, "Could not start connect worker"),
        }
    }

    /// Connect on the calling thread, retrying with backoff
    ///
    /// For hosts that already run on a worker. Returns `Ok` immediately when
    /// already `Ready`.
    ///
    /// # Errors
    ///
    /// The last classified failure once retries are exhausted, or the first
    /// non-retryable one.
    pub fn connect_blocking(&self) -> Result<(), PresenceError> {
        if self.is_ready() {
            return Ok(());
        }
        self.attempt.shared.stopped.store(false, Ordering::SeqCst);
        self.attempt.run()
    }

    /// Wait for a running connect worker to finish
    pub fn join_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("Connect worker panicked");
            }
        }
    }

    /// Publish `snapshot`; silently ignored unless `Ready`
    ///
    /// On failure the session is left `Failed`, a best-effort clear is sent,
    /// and a later `connect()` is needed to resume.
    pub fn update(&self, snapshot: &StatusSnapshot) {
        self.send(Some(snapshot));
    }

    /// Remove the current status; silently ignored unless `Ready`
    pub fn clear(&self) {
        self.send(None);
    }

    fn send(&self, snapshot: Option<&StatusSnapshot>) {
        let mut slot = self.attempt.shared.session.lock();
        let Some(session) = slot.as_mut().filter(|s| s.is_ready()) else {
            tracing::trace!("Not connected; update skipped");
            return;
        };

        if let Err(e) = session.send_activity(snapshot, self.pid) {
            tracing::warn!(
                error = %e,
                clear = snapshot.is_none(),
                "Presence update failed"
            );
            session.clear_best_effort(self.pid);
        }
    }

    /// Stop connecting and release the session
    ///
    /// Joins the connect worker. Idempotent.
    pub fn close(&self) {
        self.attempt.shared.stopped.store(true, Ordering::SeqCst);
        self.join_worker();

        let session = self.attempt.shared.session.lock().take();
        if let Some(mut session) = session {
            session.close();
            tracing::debug!("Presence session closed");
        }
    }
}

impl Drop for PresenceClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PeerError, INVALID_CLIENT_ID};
    use crate::transport::{MemoryConnector, MemoryPeer, Opcode, Refusal, WriteFailure};
    use pretty_assertions::assert_eq;

    fn fast_config() -> PresenceConfig {
        let mut config = PresenceConfig::default();
        config.connect.initial_backoff_ms = 0;
        config.connect.handshake_timeout_ms = 100;
        config
    }

    fn client_with(connector: &Arc<MemoryConnector>) -> PresenceClient {
        let connector: Arc<dyn Connector> = connector.clone();
        PresenceClient::new(connector, &fast_config())
    }

    fn ready_client() -> (PresenceClient, MemoryPeer, Arc<MemoryConnector>) {
        let peer = MemoryPeer::ready();
        let connector = Arc::new(MemoryConnector::new().then_accept(peer.clone()));
        let client = client_with(&connector);
        client.connect_blocking().unwrap();
        (client, peer, connector)
    }

    fn last_args(peer: &MemoryPeer) -> serde_json::Value {
        let frames = peer.sent_frames();
        let json: serde_json::Value = frames.last().unwrap().json().unwrap();
        json["args"].clone()
    }

    #[test]
    fn test_connect_blocking_reaches_ready() {
        let (client, _peer, connector) = ready_client();
        assert_eq!(client.phase(), Phase::Ready);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.peer().unwrap().username.as_deref(), Some("tester"));
    }

    #[test]
    fn test_absent_peer_makes_three_attempts() {
        let connector = Arc::new(MemoryConnector::new());
        let client = client_with(&connector);

        let err = client.connect_blocking().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(connector.attempts(), 3);
        assert_eq!(client.phase(), Phase::Disconnected);

        // Silent no-op while disconnected
        client.update(&StatusSnapshot::new("a", "b"));
        client.clear();
    }

    #[test]
    fn test_retry_then_success() {
        let peer = MemoryPeer::ready();
        let connector = Arc::new(
            MemoryConnector::new()
                .then_refuse(Refusal::NotFound)
                .then_accept(peer),
        );
        let client = client_with(&connector);

        client.connect_blocking().unwrap();
        assert!(client.is_ready());
        assert_eq!(connector.attempts(), 2);
    }

    #[test]
    fn test_peer_vanishing_before_ack_is_retried() {
        let vanished = MemoryPeer::new();
        vanished.hang_up();
        let healthy = MemoryPeer::ready();
        let connector = Arc::new(
            MemoryConnector::new()
                .then_accept(vanished)
                .then_accept(healthy.clone()),
        );
        let client = client_with(&connector);

        client.connect_blocking().unwrap();
        assert!(client.is_ready());
        assert_eq!(connector.attempts(), 2);
        assert_eq!(healthy.sent_frames()[0].opcode, Opcode::Handshake);
    }

    #[test]
    fn test_invalid_identifier_is_not_retried() {
        let peer = MemoryPeer::new();
        peer.push_frame(
            Opcode::Close,
            &PeerError {
                code: INVALID_CLIENT_ID,
                message: "Invalid Client ID".to_string(),
            },
        ).unwrap();
        let connector = Arc::new(MemoryConnector::new().then_accept(peer));
        let client = client_with(&connector);

        let err = client.connect_blocking().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
        assert_eq!(connector.attempts(), 1);
    }

    #[test]
    fn test_permission_denied_is_not_retried() {
        let connector = Arc::new(MemoryConnector::new().then_refuse(Refusal::PermissionDenied));
        let client = client_with(&connector);

        let err = client.connect_blocking().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(connector.attempts(), 1);
    }

    #[test]
    fn test_connect_while_ready_is_noop() {
        let (client, _peer, connector) = ready_client();

        client.connect();
        client.connect();
        client.join_worker();
        client.connect_blocking().unwrap();

        assert!(client.is_ready());
        assert_eq!(connector.attempts(), 1);
    }

    #[test]
    fn test_background_connect() {
        let peer = MemoryPeer::ready();
        let connector = Arc::new(MemoryConnector::new().then_accept(peer));
        let client = client_with(&connector);

        client.connect();
        client.join_worker();

        assert!(client.is_ready());
        assert!(!client.is_connecting());
    }

    #[test]
    fn test_update_sends_snapshot() {
        let (client, peer, _) = ready_client();

        client.update(&StatusSnapshot::new("Editing a project", "scene.blend"));

        let args = last_args(&peer);
        assert_eq!(args["pid"], client.pid());
        assert_eq!(args["activity"]["details"], "Editing a project");
        assert_eq!(args["activity"]["state"], "scene.blend");
        assert!(client.is_ready());
    }

    #[test]
    fn test_clear_then_update_leaves_latest_snapshot() {
        let (client, peer, _) = ready_client();
        let snapshot = StatusSnapshot::new("Editing a project", "scene.blend").with_start(100);

        client.update(&StatusSnapshot::new("Rendering in Cycles", "Single Frame"));
        client.clear();
        client.update(&snapshot);

        let args = last_args(&peer);
        assert_eq!(
            args["activity"],
            serde_json::json!({
                "details": "Editing a project",
                "state": "scene.blend",
                "timestamps": {"start": 100},
            })
        );
    }

    #[test]
    fn test_broken_pipe_on_update_fails_quietly() {
        let (client, peer, _) = ready_client();
        let before = peer.attempted_frames().len();
        peer.fail_writes(WriteFailure::BrokenPipe);

        client.update(&StatusSnapshot::new("a", "b"));

        assert_eq!(client.phase(), Phase::Failed);

        // The update was tried, then a best-effort clear
        let attempted = peer.attempted_frames();
        let after: Vec<serde_json::Value> = attempted[before..]
            .iter()
            .map(|frame| frame.json().unwrap())
            .collect();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0]["cmd"], "SET_ACTIVITY");
        assert_eq!(after[0]["args"]["activity"]["details"], "a");
        assert_eq!(after[1]["cmd"], "SET_ACTIVITY");
        assert!(after[1]["args"].get("activity").is_none());
        assert_eq!(after[1]["args"]["pid"], client.pid());

        // Further updates are no-ops until reconnected
        client.update(&StatusSnapshot::new("c", "d"));
        assert_eq!(client.phase(), Phase::Failed);
    }

    #[test]
    fn test_reconnect_after_failure_replaces_session() {
        let first = MemoryPeer::ready();
        let second = MemoryPeer::ready();
        let connector = Arc::new(
            MemoryConnector::new()
                .then_accept(first.clone())
                .then_accept(second.clone()),
        );
        let client = client_with(&connector);
        client.connect_blocking().unwrap();

        first.fail_writes(WriteFailure::BrokenPipe);
        client.update(&StatusSnapshot::new("a", "b"));
        assert!(!client.is_ready());

        client.connect_blocking().unwrap();
        assert!(client.is_ready());
        assert!(first.is_closed());

        client.update(&StatusSnapshot::new("c", "d"));
        assert_eq!(last_args(&second)["activity"]["details"], "c");
    }

    #[test]
    fn test_close_is_idempotent() {
        let (client, peer, _) = ready_client();

        client.close();
        client.close();

        assert_eq!(client.phase(), Phase::Disconnected);
        assert!(peer.is_closed());
        client.update(&StatusSnapshot::new("a", "b"));
    }

    #[test]
    fn test_close_during_background_connect() {
        let peer = MemoryPeer::ready();
        let connector = Arc::new(MemoryConnector::new().then_accept(peer.clone()));
        let client = client_with(&connector);

        client.connect();
        client.close();

        assert_eq!(client.phase(), Phase::Disconnected);
        assert!(!client.is_connecting());
    }

    #[test]
    fn test_connect_after_close() {
        let peer = MemoryPeer::ready();
        let connector = Arc::new(
            MemoryConnector::new()
                .then_accept(MemoryPeer::ready())
                .then_accept(peer),
        );
        let client = client_with(&connector);

        client.connect_blocking().unwrap();
        client.close();
        client.connect_blocking().unwrap();

        assert!(client.is_ready());
    }
}
