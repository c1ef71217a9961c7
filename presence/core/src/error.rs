//! Presence Errors
//!
//! The closed set of failure kinds the client can hit. Transport and codec
//! errors are folded into `PresenceError` at the session boundary so that
//! callers match on one enum.

use thiserror::Error;

use crate::protocol::PeerError;
use crate::transport::frame::CodecError;
use crate::transport::TransportError;

/// Errors surfaced by sessions and the presence client
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Peer is not running (no endpoint accepted the connection)
    #[error("Peer not found")]
    NotFound,

    /// Peer did not acknowledge in time
    #[error("Timed out waiting for the peer")]
    Timeout,

    /// Peer rejected our application identifier
    #[error("Invalid application identifier: {message}")]
    InvalidIdentifier {
        /// Reason given by the peer
        message: String,
    },

    /// Endpoint exists but we may not open it
    #[error("Permission denied opening the peer endpoint")]
    PermissionDenied,

    /// Peer actively refused the session
    #[error("Peer rejected the session ({code}): {message}")]
    Rejected {
        /// Peer error code
        code: i64,
        /// Reason given by the peer
        message: String,
    },

    /// Protocol violation
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Peer went away while we were writing
    #[error("Broken pipe")]
    BrokenPipe,

    /// Peer closed the connection
    #[error("Connection closed")]
    Closed,

    /// Operation not valid in the current session phase
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Fieldless view of `PresenceError` for exhaustive matching and logging
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See `PresenceError::NotFound`
    NotFound,
    /// See `PresenceError::Timeout`
    Timeout,
    /// See `PresenceError::InvalidIdentifier`
    InvalidIdentifier,
    /// See `PresenceError::PermissionDenied`
    PermissionDenied,
    /// See `PresenceError::Rejected`
    Rejected,
    /// See `PresenceError::Malformed`
    Malformed,
    /// See `PresenceError::BrokenPipe`
    BrokenPipe,
    /// See `PresenceError::Closed`
    Closed,
    /// See `PresenceError::InvalidState`
    InvalidState,
    /// See `PresenceError::Other`
    Other,
}

impl PresenceError {
    /// Fieldless kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Timeout => ErrorKind::Timeout,
            Self::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::Malformed(_) => ErrorKind::Malformed,
            Self::BrokenPipe => ErrorKind::BrokenPipe,
            Self::Closed => ErrorKind::Closed,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether a fresh connection attempt may succeed
    ///
    /// True for a peer that is not running, did not answer in time, or hung
    /// up before acknowledging. An explicit refusal is never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound | Self::Timeout | Self::Closed)
    }
}

impl From<TransportError> for PresenceError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound => Self::NotFound,
            TransportError::PermissionDenied => Self::PermissionDenied,
            TransportError::BrokenPipe => Self::BrokenPipe,
            TransportError::Closed => Self::Closed,
            TransportError::Timeout => Self::Timeout,
            TransportError::Io(e) => Self::Other(e.to_string()),
        }
    }
}

impl From<CodecError> for PresenceError {
    fn from(err: CodecError) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<PeerError> for PresenceError {
    fn from(err: PeerError) -> Self {
        if err.is_invalid_client_id() {
            Self::InvalidIdentifier {
                message: err.message,
            }
        } else {
            Self::Rejected {
                code: err.code,
                message: err.message,
            }
        }
    }
}
