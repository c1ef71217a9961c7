//! Handshake & Session State Machine
//!
//! One `Session` per connection attempt. It owns its channel exclusively and
//! drives it through:
//!
//! ```text
//! Disconnected ──open()──► Connecting ──channel opened, Handshake sent──► AwaitingHandshakeAck
//!                                                                              │
//!                         ┌────────────── READY within timeout ◄───────────────┘
//!                         ▼
//!                       Ready ──send_activity()──► Ready
//!
//! any phase ──I/O error / rejection / timeout──► Failed
//! any phase ──close()──► Disconnected (terminal)
//! ```
//!
//! The session never reconnects on its own. A `Failed` or closed session is
//! discarded and the caller builds a new one.

use std::time::{Duration, Instant};

use crate::activity::StatusSnapshot;
use crate::error::PresenceError;
use crate::protocol::{Activity, Command, Handshake, PeerError, PeerInfo, Response};
use crate::transport::{encode, Channel, Connector, Frame, FrameDecoder, Opcode};

/// Read buffer size for one `receive` call
const READ_CHUNK: usize = 4096;

/// Lifecycle phase of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No channel open
    Disconnected,
    /// Probing endpoints
    Connecting,
    /// Handshake sent, waiting for `READY`
    AwaitingHandshakeAck,
    /// Handshake acknowledged; activity updates allowed
    Ready,
    /// An error ended the session
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHandshakeAck => "awaiting-ack",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a frame received during the handshake means
enum HandshakeStep {
    /// Keep waiting
    Continue,
    /// Peer acknowledged
    Ready(PeerInfo),
}

/// One connection to the presence peer
pub struct Session {
    channel: Option<Box<dyn Channel>>,
    phase: Phase,
    peer: PeerInfo,
    decoder: FrameDecoder,
    application_id: String,
    /// Set by `close()`; a closed session can never be reopened
    terminal: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase)
            .field("peer", &self.peer)
            .field("application_id", &self.application_id)
            .field("terminal", &self.terminal)
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A session with no channel yet
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel: None,
            phase: Phase::Disconnected,
            peer: PeerInfo::default(),
            decoder: FrameDecoder::new(),
            application_id: String::new(),
            terminal: false,
        }
    }

    /// Connect, handshake and wait for the acknowledgement
    ///
    /// # Errors
    ///
    /// The classified failure; the half-open session is dropped (closing its
    /// channel).
    pub fn establish(
        connector: &dyn Connector,
        application_id: &str,
        handshake_timeout: Duration,
    ) -> Result<Self, PresenceError> {
        let mut session = Self::new();
        session.open(connector, application_id, handshake_timeout)?;
        Ok(session)
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether updates can be sent
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// What the acknowledgement told us about the peer
    #[must_use]
    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::trace!(from = %self.phase, to = %phase, "Session phase change");
            self.phase = phase;
        }
    }

    /// Record a failure and hand it back
    fn fail(&mut self, err: PresenceError) -> PresenceError {
        self.set_phase(Phase::Failed);
        err
    }

    /// Run `Disconnected → Connecting → AwaitingHandshakeAck → Ready`
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the session is fresh; otherwise the classified
    /// connection, handshake or acknowledgement failure (phase becomes `Failed`).
    pub fn open(
        &mut self,
        connector: &dyn Connector,
        application_id: &str,
        handshake_timeout: Duration,
    ) -> Result<(), PresenceError> {
        if self.terminal || self.phase != Phase::Disconnected {
            return Err(PresenceError::InvalidState(format!(
                "cannot open a session that is {}",
                if self.terminal { "closed".to_string() } else { self.phase.to_string() }
            )));
        }
        self.application_id = application_id.to_string();

        self.set_phase(Phase::Connecting);
        let channel = connector.connect().map_err(|e| self.fail(e.into()))?;
        self.channel = Some(channel);

        let handshake = encode(Opcode::Handshake, &Handshake::new(application_id))
            .map_err(|e| self.fail(e.into()))?;
        self.write(&handshake).map_err(vanished)?;
        self.set_phase(Phase::AwaitingHandshakeAck);

        let deadline = Instant::now() + handshake_timeout;
        match self.await_ack(deadline) {
            Ok(peer) => {
                tracing::debug!(
                    peer_pid = ?peer.process_id,
                    user = ?peer.username,
                    "Handshake acknowledged"
                );
                self.peer = peer;
                self.set_phase(Phase::Ready);
                Ok(())
            }
            Err(e) => Err(self.fail(vanished(e))),
        }
    }

    /// Read until `READY`, a rejection, EOF, or the deadline
    fn await_ack(&mut self, deadline: Instant) -> Result<PeerInfo, PresenceError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            while let Some(frame) = self.decoder.decode()? {
                if let HandshakeStep::Ready(peer) = self.on_handshake_frame(&frame)? {
                    return Ok(peer);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PresenceError::Timeout);
            }

            let channel = self.channel.as_mut().ok_or(PresenceError::Closed)?;
            channel.set_read_timeout(Some(remaining))?;
            let n = channel.receive(&mut buf)?;
            self.decoder.push(&buf[..n]);
        }
    }

    fn on_handshake_frame(&mut self, frame: &Frame) -> Result<HandshakeStep, PresenceError> {
        match frame.opcode {
            Opcode::Frame => {
                let response: Response = frame.json()?;
                if response.is_ready() {
                    return Ok(HandshakeStep::Ready(response.peer_info()));
                }
                if let Some(err) = response.peer_error() {
                    return Err(err.into());
                }
                tracing::trace!(evt = ?response.evt, "Ignoring frame before READY");
                Ok(HandshakeStep::Continue)
            }
            Opcode::Close => Err(rejection(frame)),
            Opcode::Ping => {
                let pong = Frame {
                    opcode: Opcode::Pong,
                    payload: frame.payload.clone(),
                };
                let bytes = pong.to_bytes()?;
                self.write(&bytes)?;
                Ok(HandshakeStep::Continue)
            }
            Opcode::Handshake | Opcode::Pong => Ok(HandshakeStep::Continue),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), PresenceError> {
        let result = match self.channel.as_mut() {
            Some(channel) => channel.send(bytes).map_err(PresenceError::from),
            None => Err(PresenceError::Closed),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Publish `snapshot`, or clear the activity when `None`
    ///
    /// No acknowledgement is awaited. Replies the peer has already written
    /// are drained afterwards so they never pile up.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Ready`; otherwise the write or drain failure
    /// (phase becomes `Failed`).
    pub fn send_activity(
        &mut self,
        snapshot: Option<&StatusSnapshot>,
        pid: u32,
    ) -> Result<(), PresenceError> {
        if self.terminal || self.phase != Phase::Ready {
            return Err(PresenceError::InvalidState(format!(
                "cannot send activity while {}",
                if self.terminal { "closed".to_string() } else { self.phase.to_string() }
            )));
        }

        let command = Command::set_activity(pid, snapshot.map(Activity::from));
        let bytes = encode(Opcode::Frame, &command).map_err(|e| self.fail(e.into()))?;
        self.write(&bytes)?;
        self.drain_replies()
    }

    /// Write a clear command whatever the phase, ignoring failure
    ///
    /// Used after a failed update so the peer does not keep showing a stale
    /// status if the channel is still partly alive.
    pub fn clear_best_effort(&mut self, pid: u32) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        match encode(Opcode::Frame, &Command::set_activity(pid, None)) {
            Ok(bytes) => {
                if let Err(e) = channel.send(&bytes) {
                    tracing::debug!(error = %e, "Best-effort clear failed");
                }
            }
            Err(e) => tracing::debug!(error = %e, "Could not encode clear command"),
        }
    }

    /// Consume whatever the peer has already sent, without blocking
    fn drain_replies(&mut self) -> Result<(), PresenceError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let Some(channel) = self.channel.as_mut() else {
                return Ok(());
            };
            match channel.try_receive(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.decoder.push(&buf[..n]),
                Err(e) => return Err(self.fail(e.into())),
            }
        }

        loop {
            let frame = match self.decoder.decode() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.fail(e.into())),
            };
            match frame.opcode {
                Opcode::Close => return Err(self.fail(rejection(&frame))),
                Opcode::Frame => match frame.json::<Response>() {
                    Ok(response) => {
                        if let Some(err) = response.peer_error() {
                            tracing::warn!(
                                code = err.code,
                                message = %err.message,
                                "Peer rejected activity update"
                            );
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "Unparseable reply from peer"),
                },
                Opcode::Ping => {
                    let pong = Frame {
                        opcode: Opcode::Pong,
                        payload: frame.payload,
                    };
                    let bytes = pong.to_bytes()?;
                    self.write(&bytes)?;
                }
                Opcode::Handshake | Opcode::Pong => {}
            }
        }
    }

    /// End the session
    ///
    /// Sends a `Close` frame if the handshake completed, then releases the
    /// channel. Idempotent. The session cannot be reopened afterwards.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if self.phase == Phase::Ready {
                match encode(Opcode::Close, &Handshake::new(self.application_id.clone())) {
                    Ok(bytes) => {
                        if let Err(e) = channel.send(&bytes) {
                            tracing::debug!(error = %e, "Close frame not delivered");
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "Could not encode close frame"),
                }
            }
            channel.close();
        }
        self.decoder.clear();
        self.terminal = true;
        self.set_phase(Phase::Disconnected);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }
}

/// Before `READY` a dropped connection means the peer went away, not that it refused
fn vanished(err: PresenceError) -> PresenceError {
    match err {
        PresenceError::BrokenPipe => PresenceError::Closed,
        other => other,
    }
}

/// Turn a peer `Close` frame into an error
///
/// A body without a usable code still counts as an explicit refusal.
fn rejection(frame: &Frame) -> PresenceError {
    match frame.json::<PeerError>() {
        Ok(err) => err.into(),
        Err(_) => PresenceError::Rejected {
            code: 0,
            message: String::from_utf8_lossy(&frame.payload).into_owned(),
        },
    }
}
