//! IPC Transport
//!
//! Connects to the chat client's local IPC endpoint.
//!
//! # Endpoint Location
//!
//! Unix: `discord-ipc-{0..9}` under each of `$XDG_RUNTIME_DIR`, `$TMPDIR`,
//! `$TMP`, `$TEMP` and `/tmp`, plus the snap and flatpak sub-directories of
//! each base directory.
//!
//! Windows: named pipes `\\?\pipe\discord-ipc-{0..9}`.
//!
//! The first candidate that accepts a connection wins.

#[cfg(unix)]
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::traits::{Channel, Connector, TransportError};

/// Number of numbered endpoints the peer may listen on
const ENDPOINT_SLOTS: usize = 10;

/// Endpoint file name prefix
const ENDPOINT_PREFIX: &str = "discord-ipc-";

/// Sub-directories probed under every base directory (plain, snap, flatpak)
#[cfg(unix)]
const SANDBOX_SUBDIRS: [&str; 3] = ["", "snap.discord", "app/com.discordapp.Discord"];

/// Environment variables naming candidate base directories, in probe order
#[cfg(unix)]
const BASE_DIR_VARS: [&str; 4] = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];

/// Build the ordered candidate list from a set of base directories
///
/// Duplicate base directories are probed once.
#[cfg(unix)]
#[must_use]
pub fn candidates_from(base_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen: Vec<&PathBuf> = Vec::new();
    let mut out = Vec::new();

    for base in base_dirs {
        if seen.contains(&base) {
            continue;
        }
        seen.push(base);

        for subdir in SANDBOX_SUBDIRS {
            let dir = if subdir.is_empty() {
                base.clone()
            } else {
                base.join(subdir)
            };
            for slot in 0..ENDPOINT_SLOTS {
                out.push(dir.join(format!("{ENDPOINT_PREFIX}{slot}")));
            }
        }
    }
    out
}

/// Default endpoint candidates for this platform
#[cfg(unix)]
#[must_use]
pub fn default_candidates() -> Vec<PathBuf> {
    let mut bases: Vec<PathBuf> = BASE_DIR_VARS
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .collect();
    bases.push(PathBuf::from("/tmp"));
    candidates_from(&bases)
}

/// Default endpoint candidates for this platform
#[cfg(windows)]
#[must_use]
pub fn default_candidates() -> Vec<PathBuf> {
    (0..ENDPOINT_SLOTS)
        .map(|slot| PathBuf::from(format!(r"\\?\pipe\{ENDPOINT_PREFIX}{slot}")))
        .collect()
}

/// Connector for the peer's local IPC endpoint
#[derive(Clone, Debug)]
pub struct IpcConnector {
    /// Endpoints probed in order
    candidates: Vec<PathBuf>,
    /// Write timeout applied to opened channels
    write_timeout: Option<Duration>,
}

impl IpcConnector {
    /// Create a connector probing the platform default candidates
    #[must_use]
    pub fn discover() -> Self {
        Self::with_candidates(default_candidates())
    }

    /// Create a connector probing exactly `candidates`, in order
    #[must_use]
    pub fn with_candidates(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            write_timeout: None,
        }
    }

    /// Create a connector for a single explicit endpoint
    #[must_use]
    pub fn with_endpoint(path: impl Into<PathBuf>) -> Self {
        Self::with_candidates(vec![path.into()])
    }

    /// Bound how long a single write may block
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    /// Get the candidate list
    #[must_use]
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }
}

impl Connector for IpcConnector {
    fn connect(&self) -> Result<Box<dyn Channel>, TransportError> {
        let mut denied = false;

        for path in &self.candidates {
            match open_endpoint(path, self.write_timeout) {
                Ok(channel) => {
                    tracing::debug!(path = ?path, "Opened IPC endpoint");
                    return Ok(channel);
                }
                Err(TransportError::PermissionDenied) => {
                    tracing::debug!(path = ?path, "IPC endpoint refused: permission denied");
                    denied = true;
                }
                Err(e) => {
                    tracing::trace!(path = ?path, error = %e, "IPC endpoint unavailable");
                }
            }
        }

        if denied {
            Err(TransportError::PermissionDenied)
        } else {
            Err(TransportError::NotFound)
        }
    }
}

#[cfg(unix)]
fn open_endpoint(
    path: &Path,
    write_timeout: Option<Duration>,
) -> Result<Box<dyn Channel>, TransportError> {
    let stream = std::os::unix::net::UnixStream::connect(path)?;
    stream.set_write_timeout(write_timeout)?;
    Ok(Box::new(UnixChannel {
        stream: Some(stream),
    }))
}

#[cfg(windows)]
fn open_endpoint(
    path: &Path,
    write_timeout: Option<Duration>,
) -> Result<Box<dyn Channel>, TransportError> {
    Ok(Box::new(super::pipe::PipeChannel::open(path, write_timeout)?))
}

/// `UnixStream::set_read_timeout` rejects a zero duration
#[cfg(unix)]
fn nonzero(timeout: Option<Duration>) -> Option<Duration> {
    timeout.map(|t| t.max(Duration::from_millis(1)))
}

/// Channel over a Unix domain socket
#[cfg(unix)]
#[derive(Debug)]
pub struct UnixChannel {
    stream: Option<std::os::unix::net::UnixStream>,
}

#[cfg(unix)]
impl Channel for UnixChannel {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(bytes)?;
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        match stream.read(buf)? {
            0 => Err(TransportError::Closed),
            n => Ok(n),
        }
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.set_nonblocking(true)?;
        let result = stream.read(buf);
        stream.set_nonblocking(false)?;

        match result {
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        let stream = self.stream.as_ref().ok_or(TransportError::Closed)?;
        stream.set_read_timeout(nonzero(timeout))?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}
