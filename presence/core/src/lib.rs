//! Presence Core - Blender Rich Presence over Local IPC
//!
//! This crate publishes what a Blender session is doing (editing, rendering,
//! which file, for how long) to a chat client running on the same machine,
//! over the client's local IPC endpoint. The peer may not be running, may
//! start after us, may crash mid-session, or may reject what we send. None of
//! that ever reaches the host as an error or a stall.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Host lifecycle hooks                      │
//! │   start / stop / file loaded / render start,end / tick       │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┴───────────────────────────────┐
//! │ PresenceService                                              │
//! │  ┌─────────────┐ ┌────────────────┐ ┌──────────┐ ┌─────────┐ │
//! │  │ compose()   │ │ ReconnectPolicy│ │  Marker  │ │ Options │ │
//! │  └──────┬──────┘ └───────┬────────┘ └──────────┘ └─────────┘ │
//! │         └────────┬───────┘                                   │
//! │           ┌──────┴────────┐                                  │
//! │           │PresenceClient │── presence-connect worker        │
//! │           └──────┬────────┘                                  │
//! │           ┌──────┴────────┐                                  │
//! │           │   Session     │  handshake state machine         │
//! │           └──────┬────────┘                                  │
//! │           ┌──────┴────────┐                                  │
//! │           │ Frame codec + │  opcode · length · JSON          │
//! │           │   Channel     │  unix socket / named pipe        │
//! │           └───────────────┘                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`PresenceService`]: one instance per host process, driven by its hooks
//! - [`PresenceClient`]: `connect` / `update` / `clear` / `close`
//! - [`Session`]: one connection and its handshake state machine
//! - [`StatusSnapshot`]: one complete status
//! - [`PresenceError`]: the closed set of failure kinds
//!
//! # Quick Start
//!
//! ```ignore
//! use presence_core::{load_config, PidFileMarker, PresenceService};
//!
//! let config = load_config()?;
//! let marker = PidFileMarker::new(config.marker.resolved_path());
//! let mut service = PresenceService::from_config(&config, marker, config.options.clone());
//!
//! let first_tick = service.start();
//! // ... every `service.tick_interval()` on the host's main loop:
//! let outcome = service.tick(&host_info);
//! // ... on shutdown:
//! service.stop();
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod activity;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod marker;
pub mod protocol;
pub mod reconnect;
pub mod service;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use activity::{
    compose, engine_display_name, now_epoch_secs, FrameRange, HostInfo, HostVersion,
    RenderContext, StaticHostInfo, StatusSnapshot,
};
pub use client::PresenceClient;
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigSource,
    OptionsSource, PresenceConfig, PresenceOptions, RenderingDisplayMode,
};
pub use error::{ErrorKind, PresenceError};
pub use logging::{init_logging, set_logging_enabled};
pub use marker::{InstanceMarker, MemoryMarker, PidFileMarker};
pub use protocol::{Activity, PeerInfo};
pub use reconnect::ReconnectPolicy;
pub use service::{PresenceService, TickAction, TickOutcome};
pub use session::{Phase, Session};
pub use transport::{Channel, Connector, IpcConnector, TransportError};
