//! Windows Named Pipe Channel
//!
//! The pipe is opened for overlapped I/O so that every read and write has a
//! deadline: the operation is started, waited on for at most the remaining
//! time, and cancelled if the time runs out.
//!
//! ```text
//!   ReadFile/WriteFile ──► ERROR_IO_PENDING ──► GetOverlappedResultEx(timeout)
//!                                                 │ done      │ WAIT_TIMEOUT
//!                                                 ▼           ▼
//!                                              Ok(n)     CancelIoEx + reap
//! ```

use std::fs::{File, OpenOptions};
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::path::Path;
use std::time::{Duration, Instant};

use windows::core::PCWSTR;
use windows::Win32::Foundation::{
    CloseHandle, BOOL, ERROR_IO_PENDING, ERROR_MORE_DATA, ERROR_PIPE_NOT_CONNECTED, HANDLE,
    WAIT_TIMEOUT, WIN32_ERROR,
};
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile, FILE_FLAG_OVERLAPPED};
use windows::Win32::System::Pipes::PeekNamedPipe;
use windows::Win32::System::Threading::{CreateEventW, INFINITE};
use windows::Win32::System::IO::{CancelIoEx, GetOverlappedResult, GetOverlappedResultEx, OVERLAPPED};

use super::traits::{Channel, TransportError};

fn os_error(err: windows::core::Error) -> TransportError {
    if err.code() == ERROR_PIPE_NOT_CONNECTED.to_hresult() {
        return TransportError::BrokenPipe;
    }
    std::io::Error::from(err).into()
}

/// On the read side a broken pipe is the peer's EOF
fn read_error(err: TransportError) -> TransportError {
    match err {
        TransportError::BrokenPipe => TransportError::Closed,
        other => other,
    }
}

/// Wait budget in milliseconds; `None` waits forever, anything else at least 1 ms
fn wait_millis(timeout: Option<Duration>) -> u32 {
    match timeout {
        None => INFINITE,
        Some(t) => u32::try_from(t.as_millis())
            .unwrap_or(INFINITE - 1)
            .clamp(1, INFINITE - 1),
    }
}

/// Manual-reset event signalled when an overlapped operation completes
#[derive(Debug)]
struct Event(HANDLE);

// SAFETY: an event handle may be waited on and closed from any thread
unsafe impl Send for Event {}

impl Event {
    fn new() -> Result<Self, TransportError> {
        // SAFETY: unnamed event with default security; the handle is owned by `Event`
        let handle = unsafe { CreateEventW(None, BOOL::from(true), BOOL::from(false), PCWSTR::null()) }
            .map_err(os_error)?;
        Ok(Self(handle))
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        // SAFETY: the handle came from CreateEventW and is closed exactly once
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Channel over a Windows named pipe
#[derive(Debug)]
pub struct PipeChannel {
    file: Option<File>,
    event: Event,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl PipeChannel {
    /// Open the pipe at `path` for overlapped I/O
    ///
    /// # Errors
    ///
    /// The classified open failure (`NotFound`, `PermissionDenied`, ...).
    pub fn open(path: &Path, write_timeout: Option<Duration>) -> Result<Self, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(FILE_FLAG_OVERLAPPED.0)
            .open(path)?;
        Ok(Self {
            file: Some(file),
            event: Event::new()?,
            read_timeout: None,
            write_timeout,
        })
    }

    fn handle(&self) -> Result<HANDLE, TransportError> {
        let file = self.file.as_ref().ok_or(TransportError::Closed)?;
        Ok(HANDLE(file.as_raw_handle() as _))
    }

    fn overlapped(&self) -> OVERLAPPED {
        OVERLAPPED {
            hEvent: self.event.0,
            ..Default::default()
        }
    }

    /// Bytes the peer has written that we have not read
    fn available(&self) -> Result<u32, TransportError> {
        let handle = self.handle()?;
        let mut avail = 0u32;
        // SAFETY: the handle is open; no buffer is passed, only the count is written
        unsafe { PeekNamedPipe(handle, None, 0, None, Some(&mut avail as *mut u32), None) }
            .map_err(|e| read_error(os_error(e)))?;
        Ok(avail)
    }

    /// Wait for a started operation, cancelling it after `timeout`
    ///
    /// Returns only once the kernel no longer references `overlapped` or the
    /// operation's buffer.
    fn finish(
        &self,
        handle: HANDLE,
        overlapped: &mut OVERLAPPED,
        started: windows::core::Result<()>,
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        if let Err(e) = started {
            let code = e.code();
            if code != ERROR_IO_PENDING.to_hresult() && code != ERROR_MORE_DATA.to_hresult() {
                return Err(os_error(e));
            }
        }

        let mut transferred = 0u32;
        // SAFETY: `overlapped` and the caller's buffer outlive this wait
        let waited = unsafe {
            GetOverlappedResultEx(
                handle,
                overlapped,
                &mut transferred,
                wait_millis(timeout),
                BOOL::from(false),
            )
        };

        match waited {
            Ok(()) => Ok(transferred as usize),
            Err(e) if e.code() == ERROR_MORE_DATA.to_hresult() => Ok(transferred as usize),
            Err(e) if e.code() == WIN32_ERROR(WAIT_TIMEOUT.0).to_hresult() => {
                // SAFETY: cancel our own operation, then block until the kernel
                // has released it
                let reaped = unsafe {
                    let _ = CancelIoEx(handle, Some(overlapped as *const OVERLAPPED));
                    GetOverlappedResult(handle, overlapped, &mut transferred, BOOL::from(true))
                };
                // Completed just before the cancel landed: keep the bytes
                match reaped {
                    Ok(()) if transferred > 0 => Ok(transferred as usize),
                    _ => Err(TransportError::Timeout),
                }
            }
            Err(e) => Err(os_error(e)),
        }
    }

    fn read_within(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, TransportError> {
        let handle = self.handle()?;
        let mut overlapped = self.overlapped();
        // SAFETY: `buf` and `overlapped` stay borrowed until `finish` has reaped the read
        let started = unsafe {
            ReadFile(
                handle,
                Some(&mut *buf),
                None,
                Some(&mut overlapped as *mut OVERLAPPED),
            )
        };
        match self.finish(handle, &mut overlapped, started, timeout).map_err(read_error)? {
            0 => Err(TransportError::Closed),
            n => Ok(n),
        }
    }
}

impl Channel for PipeChannel {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let deadline = self.write_timeout.map(|t| Instant::now() + t);
        let mut written = 0;

        while written < bytes.len() {
            let remaining = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(TransportError::Timeout);
                    }
                    Some(left)
                }
                None => None,
            };

            let handle = self.handle()?;
            let mut overlapped = self.overlapped();
            let chunk = &bytes[written..];
            // SAFETY: `chunk` and `overlapped` stay borrowed until `finish` has reaped the write
            let started = unsafe {
                WriteFile(
                    handle,
                    Some(chunk),
                    None,
                    Some(&mut overlapped as *mut OVERLAPPED),
                )
            };
            match self.finish(handle, &mut overlapped, started, remaining)? {
                0 => return Err(TransportError::BrokenPipe),
                n => written += n,
            }
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let timeout = self.read_timeout;
        self.read_within(buf, timeout)
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let avail = self.available()?;
        if avail == 0 || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min(avail as usize);
        // Data is already buffered, so this completes without waiting
        self.read_within(&mut buf[..len], Some(Duration::ZERO))
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        if self.file.is_none() {
            return Err(TransportError::Closed);
        }
        self.read_timeout = timeout;
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}
