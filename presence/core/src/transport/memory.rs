//! In-Memory Transport
//!
//! A scripted peer that lives in the same process. Used by the session and
//! client tests, and available to hosts that want to test their integration
//! without a chat client running.
//!
//! # Usage
//!
//! ```ignore
//! let peer = MemoryPeer::ready();
//! let connector = MemoryConnector::new().then_accept(peer.clone());
//!
//! let session = Session::establish(&connector, "1234", Duration::from_secs(1))?;
//! // ... drive the session ...
//! assert_eq!(peer.sent_frames().len(), 2);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use super::frame::{decode, encode, CodecError, Frame, FrameDecoder, Opcode};
use super::traits::{Channel, Connector, TransportError};
use crate::protocol::Response;

/// How scripted writes fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteFailure {
    /// Peer vanished
    BrokenPipe,
    /// Peer stopped reading
    Timeout,
}

/// How a scripted connection attempt fails
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refusal {
    /// Nothing listening
    NotFound,
    /// Endpoint exists but is not ours
    PermissionDenied,
}

#[derive(Debug, Default)]
struct PeerState {
    /// Bytes the peer has written to us, not yet read
    inbound: VecDeque<u8>,
    /// Everything we wrote to the peer
    outbound: Vec<u8>,
    /// Every write we attempted, including failed ones
    attempted: Vec<Vec<u8>>,
    /// Hang up once this many writes have been delivered
    hang_up_after: Option<usize>,
    /// Writes delivered so far
    delivered: usize,
    /// Scripted write failure
    fail_writes: Option<WriteFailure>,
    /// Peer hung up: reads report `Closed` once `inbound` is drained
    hung_up: bool,
    /// Our side closed the channel
    closed: bool,
}

/// The peer end of an in-memory channel
///
/// Cloning shares the same underlying state.
#[derive(Clone, Debug, Default)]
pub struct MemoryPeer {
    state: Arc<Mutex<PeerState>>,
}

impl MemoryPeer {
    /// A peer that has not written anything yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A peer with a `READY` acknowledgement already queued
    #[must_use]
    pub fn ready() -> Self {
        let peer = Self::new();
        let queued = peer.push_frame(Opcode::Frame, &Response::ready(None, "tester"));
        debug_assert!(queued.is_ok(), "READY response failed to encode");
        peer
    }

    /// Queue a frame for the client to read
    ///
    /// # Errors
    ///
    /// The payload does not encode; nothing is queued.
    pub fn push_frame<T: Serialize>(&self, opcode: Opcode, payload: &T) -> Result<(), CodecError> {
        let bytes = encode(opcode, payload)?;
        self.push_bytes(&bytes);
        Ok(())
    }

    /// Queue raw bytes for the client to read
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes.iter().copied());
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, failure: WriteFailure) {
        self.state.lock().fail_writes = Some(failure);
    }

    /// Simulate the peer process exiting
    pub fn hang_up(&self) {
        self.state.lock().hung_up = true;
    }

    /// Exit after accepting `writes` more writes from the client
    pub fn hang_up_after_writes(&self, writes: usize) {
        let mut state = self.state.lock();
        state.hang_up_after = Some(state.delivered + writes);
    }

    /// Whether the client closed its end
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Raw bytes the client has written
    #[must_use]
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.state.lock().outbound.clone()
    }

    /// Frames the client tried to write, in order, whether or not the write succeeded
    ///
    /// Undecodable writes are skipped.
    #[must_use]
    pub fn attempted_frames(&self) -> Vec<Frame> {
        self.state
            .lock()
            .attempted
            .iter()
            .filter_map(|bytes| decode(bytes).ok())
            .collect()
    }

    /// Frames the client has written, in order
    ///
    /// Stops at the first undecodable frame.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        decoder.push(&self.sent_bytes());

        let mut frames = Vec::new();
        while let Ok(Some(frame)) = decoder.decode() {
            frames.push(frame);
        }
        frames
    }

    /// Open the client end of this peer
    #[must_use]
    pub fn channel(&self) -> MemoryChannel {
        MemoryChannel {
            state: Arc::clone(&self.state),
            closed: false,
        }
    }
}

/// Client end of an in-memory channel
#[derive(Debug)]
pub struct MemoryChannel {
    state: Arc<Mutex<PeerState>>,
    closed: bool,
}

impl MemoryChannel {
    fn read_into(&self, buf: &mut [u8]) -> usize {
        let mut state = self.state.lock();
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut state = self.state.lock();
        state.attempted.push(bytes.to_vec());
        if state.hang_up_after.is_some_and(|limit| state.delivered >= limit) {
            state.hung_up = true;
        }

        let failure = state.fail_writes;
        match failure {
            Some(WriteFailure::BrokenPipe) => Err(TransportError::BrokenPipe),
            Some(WriteFailure::Timeout) => Err(TransportError::Timeout),
            None if state.hung_up => Err(TransportError::BrokenPipe),
            None => {
                state.outbound.extend_from_slice(bytes);
                state.delivered += 1;
                Ok(())
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        match self.read_into(buf) {
            0 if self.state.lock().hung_up => Err(TransportError::Closed),
            // Nothing queued: behave as if the read timeout elapsed
            0 => Err(TransportError::Timeout),
            n => Ok(n),
        }
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        match self.read_into(buf) {
            0 if self.state.lock().hung_up => Err(TransportError::Closed),
            n => Ok(n),
        }
    }

    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().closed = true;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Connector that hands out scripted outcomes in order
///
/// Once the script is exhausted every attempt fails with `NotFound`.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    script: Mutex<VecDeque<Result<MemoryPeer, Refusal>>>,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    /// A connector with an empty script (the peer is not running)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next attempt connects to `peer`
    #[must_use]
    pub fn then_accept(self, peer: MemoryPeer) -> Self {
        self.script.lock().push_back(Ok(peer));
        self
    }

    /// Next attempt is refused
    #[must_use]
    pub fn then_refuse(self, refusal: Refusal) -> Self {
        self.script.lock().push_back(Err(refusal));
        self
    }

    /// Append an outcome to a shared connector
    pub fn push(&self, outcome: Result<MemoryPeer, Refusal>) {
        self.script.lock().push_back(outcome);
    }

    /// Number of `connect` calls so far
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> Result<Box<dyn Channel>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(Ok(peer)) => Ok(Box::new(peer.channel())),
            Some(Err(Refusal::PermissionDenied)) => Err(TransportError::PermissionDenied),
            Some(Err(Refusal::NotFound)) | None => Err(TransportError::NotFound),
        }
    }
}
