//! Instance Marker
//!
//! A single durable value, the pid of the process currently allowed to
//! publish status. Several host processes may run at once; only the owner
//! writes, everyone else clears.
//!
//! Marker I/O is best effort. A marker that cannot be read counts as absent,
//! and failures to write or remove it are logged, never returned.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Durable "who owns the status" record
pub trait InstanceMarker: Send + Sync {
    /// Pid of the current owner, if any
    fn read_owner(&self) -> Option<u32>;

    /// Atomically make `pid` the owner
    fn claim(&self, pid: u32);

    /// Remove the marker
    fn release(&self);
}

/// Marker stored as a decimal pid in a file
#[derive(Clone, Debug)]
pub struct PidFileMarker {
    path: PathBuf,
}

impl PidFileMarker {
    /// Marker at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker file location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self, pid: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!("-{pid}"));
        PathBuf::from(name)
    }

    /// Write to `<path>-<pid>`, fsync, then rename over `<path>`
    fn write_atomic(&self, pid: u32) -> std::io::Result<()> {
        let staging = self.staging_path(pid);
        {
            let mut file = fs::File::create(&staging)?;
            write!(file, "{pid}")?;
            file.flush()?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        Ok(())
    }
}

impl InstanceMarker for PidFileMarker {
    fn read_owner(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.path).ok()?;
        contents.trim().parse().ok()
    }

    fn claim(&self, pid: u32) {
        match self.write_atomic(pid) {
            Ok(()) => tracing::debug!(pid, path = ?self.path, "Claimed instance marker"),
            Err(e) => tracing::warn!(error = %e, path = ?self.path, "Failed to write instance marker"),
        }
    }

    fn release(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = ?self.path, "Instance marker removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, path = ?self.path, "Failed to remove instance marker"),
        }
    }
}

/// In-memory marker for tests and single-process hosts
#[derive(Debug, Default)]
pub struct MemoryMarker {
    owner: Mutex<Option<u32>>,
}

impl MemoryMarker {
    /// Marker with no owner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker already owned by `pid`
    #[must_use]
    pub fn owned_by(pid: u32) -> Self {
        Self {
            owner: Mutex::new(Some(pid)),
        }
    }
}

impl InstanceMarker for MemoryMarker {
    fn read_owner(&self) -> Option<u32> {
        *self.owner.lock()
    }

    fn claim(&self, pid: u32) {
        *self.owner.lock() = Some(pid);
    }

    fn release(&self) {
        *self.owner.lock() = None;
    }
}

impl<T: InstanceMarker + ?Sized> InstanceMarker for std::sync::Arc<T> {
    fn read_owner(&self) -> Option<u32> {
        (**self).read_owner()
    }

    fn claim(&self, pid: u32) {
        (**self).claim(pid);
    }

    fn release(&self) {
        (**self).release();
    }
}
