//! Logging Setup
//!
//! `tracing` output with a global on/off gate for this crate's events. The
//! gate backs the user-facing "enable logging" option, so it can be flipped
//! at any time without reinstalling the subscriber.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::filter::{filter_fn, FilterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Target prefix of every event emitted by this crate
pub const CRATE_TARGET: &str = "presence_core";

static LOGGING_ENABLED: AtomicBool = AtomicBool::new(false);

/// Turn this crate's log output on or off
pub fn set_logging_enabled(enabled: bool) {
    LOGGING_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether this crate's log output is on
#[must_use]
pub fn logging_enabled() -> bool {
    LOGGING_ENABLED.load(Ordering::Relaxed)
}

/// Whether an event from `target` passes the gate
fn gate_allows(target: &str, enabled: bool) -> bool {
    enabled || !target.starts_with(CRATE_TARGET)
}

/// Install a `fmt` subscriber with an `EnvFilter` and the logging gate
///
/// `RUST_LOG` wins when set; otherwise `presence_core` and each of
/// `extra_targets` log at `level`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: &str, extra_targets: &[&str]) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = std::iter::once(CRATE_TARGET)
            .chain(extra_targets.iter().copied())
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",");
        EnvFilter::new(directives)
    });
    let gate = filter_fn(|meta| gate_allows(meta.target(), logging_enabled()));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(filter.and(gate)),
        )
        .try_init()
}
