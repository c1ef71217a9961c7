//! Transport Traits
//!
//! Core trait definitions for the local presence channel.
//!
//! Two traits define the client side of the connection:
//! - `Channel`: an open, byte-oriented, bidirectional connection to the peer
//! - `Connector`: knows how to open a `Channel` (endpoint discovery lives here)
//!
//! All I/O behind these traits is blocking. Callers are expected to invoke
//! `Connector::connect` from a worker thread, never from the host's primary loop.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// No endpoint candidate accepted a connection (peer not running)
    #[error("No IPC endpoint accepted the connection")]
    NotFound,
    /// An endpoint exists but we are not allowed to open it
    #[error("Permission denied opening IPC endpoint")]
    PermissionDenied,
    /// The peer went away while we were writing
    #[error("Broken pipe")]
    BrokenPipe,
    /// The peer closed the connection (EOF) or the channel was closed locally
    #[error("Connection closed")]
    Closed,
    /// A read or write did not complete within its timeout
    #[error("Timed out")]
    Timeout,
    /// Any other IO error from the underlying stream
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::BrokenPipe,
            io::ErrorKind::UnexpectedEof => Self::Closed,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(err),
        }
    }
}

/// An open connection to the presence peer
///
/// A `Channel` is owned exclusively by one `Session`. It must be `Send` so the
/// session can be created on the connect worker and then used (and closed)
/// from the host's primary loop.
pub trait Channel: Send {
    /// Write all of `bytes` to the peer
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read up to `buf.len()` bytes
    ///
    /// Blocks until at least one byte is available, the read timeout elapses
    /// (`TransportError::Timeout`) or the peer closes (`TransportError::Closed`).
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Read whatever is already buffered without blocking
    ///
    /// Returns `Ok(0)` when nothing is pending.
    fn try_receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Set the timeout applied to subsequent `receive` calls (`None` = block forever)
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError>;

    /// Close the connection
    ///
    /// Idempotent: calling it on an already-closed channel is a no-op.
    fn close(&mut self);

    /// Whether `close` has been called (or the peer hung up and we noticed)
    fn is_closed(&self) -> bool;
}

/// Opens channels to the presence peer
pub trait Connector: Send + Sync {
    /// Open a new channel
    ///
    /// # Errors
    ///
    /// `TransportError::NotFound` if no endpoint accepts the connection,
    /// `TransportError::PermissionDenied` if an endpoint exists but refused us.
    fn connect(&self) -> Result<Box<dyn Channel>, TransportError>;
}
