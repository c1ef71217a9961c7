//! Reconnection Policy
//!
//! Cooldown-gated reconnect attempts, driven by the host's periodic tick.
//! The policy only decides *whether* to attempt; the caller supplies the
//! attempt itself, so the gate is testable without any I/O.
//!
//! # Usage
//!
//! ```ignore
//! let mut policy = ReconnectPolicy::new(Duration::from_secs(10));
//!
//! // On every tick while disconnected
//! policy.maybe_reconnect(Instant::now(), || client.connect());
//! ```

use std::time::{Duration, Instant};

/// Default minimum time between two attempts
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Tracks the last reconnect attempt and enforces the cooldown
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    cooldown: Duration,
    last_attempt: Option<Instant>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl ReconnectPolicy {
    /// Policy with the given cooldown; the first call always attempts
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_attempt: None,
        }
    }

    /// Configured cooldown
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// When the last attempt was made
    #[must_use]
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Whether an attempt at `now` is outside the cooldown
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_attempt {
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
            None => true,
        }
    }

    /// Call `connect` unless the previous attempt is within the cooldown
    ///
    /// Returns whether `connect` was called. The attempt time is recorded
    /// before calling, so a slow or failing attempt still starts the cooldown.
    pub fn maybe_reconnect<F: FnOnce()>(&mut self, now: Instant, connect: F) -> bool {
        if !self.is_due(now) {
            tracing::trace!(
                cooldown_secs = self.cooldown.as_secs(),
                "Reconnect suppressed by cooldown"
            );
            return false;
        }
        self.last_attempt = Some(now);
        tracing::debug!("Attempting reconnect");
        connect();
        true
    }

    /// Forget the last attempt (next call attempts immediately)
    pub fn reset(&mut self) {
        self.last_attempt = None;
    }
}
