//! Presence Service
//!
//! The single long-lived object a host integration holds. It owns the
//! client, the reconnect policy, the instance marker, the options source and
//! the render/session timing, and exposes one method per host lifecycle hook.
//!
//! Every method here runs on the host's primary loop and returns promptly:
//! connection attempts go to the client's worker thread, and the only I/O is
//! the marker file and an already-connected socket write.
//!
//! # Hook Mapping
//!
//! | Host event            | Method                 |
//! |-----------------------|------------------------|
//! | add-on enabled        | `start`                |
//! | add-on disabled       | `stop`                 |
//! | file loaded           | `on_file_loaded`       |
//! | file saved            | `on_file_saved`        |
//! | render job started    | `on_render_start`      |
//! | render job ended      | `on_render_end`        |
//! | frame rendered        | `on_frame_rendered`    |
//! | periodic timer        | `tick`                 |
//! | "test update" button  | `send_test_update`     |

use std::time::{Duration, Instant};

use crate::activity::{compose, now_epoch_secs, HostInfo, RenderContext, StatusSnapshot};
use crate::client::PresenceClient;
use crate::config::{OptionsSource, PresenceConfig};
use crate::logging::set_logging_enabled;
use crate::marker::InstanceMarker;
use crate::reconnect::ReconnectPolicy;

/// What a tick did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickAction {
    /// No session; `reconnect_attempted` says whether the cooldown allowed a new attempt
    NotConnected {
        /// Whether a connect was started this tick
        reconnect_attempted: bool,
    },
    /// Another process owns the marker; our status was cleared
    ClearedForOtherOwner {
        /// Pid found in the marker
        owner: u32,
    },
    /// The snapshot was sent
    Updated(StatusSnapshot),
}

/// Result of a tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickOutcome {
    /// What happened
    pub action: TickAction,
    /// When the host should tick again
    pub next_tick: Duration,
}

/// Host-facing presence service
#[derive(Debug)]
pub struct PresenceService<M: InstanceMarker, O: OptionsSource> {
    client: PresenceClient,
    reconnect: ReconnectPolicy,
    marker: M,
    options: O,
    large_image_key: String,
    tick_interval: Duration,
    first_tick: Duration,
    session_start: i64,
    render: Option<RenderContext>,
}

impl<M: InstanceMarker, O: OptionsSource> PresenceService<M, O> {
    /// Service around an existing client
    #[must_use]
    pub fn new(client: PresenceClient, config: &PresenceConfig, marker: M, options: O) -> Self {
        Self {
            client,
            reconnect: ReconnectPolicy::new(config.reconnect.cooldown()),
            marker,
            options,
            large_image_key: config.large_image_key.clone(),
            tick_interval: config.reconnect.tick_interval(),
            first_tick: config.reconnect.first_tick(),
            session_start: now_epoch_secs(),
            render: None,
        }
    }

    /// Service with a client for the configured endpoint
    #[must_use]
    pub fn from_config(config: &PresenceConfig, marker: M, options: O) -> Self {
        Self::new(PresenceClient::from_config(config), config, marker, options)
    }

    /// The underlying client
    #[must_use]
    pub fn client(&self) -> &PresenceClient {
        &self.client
    }

    /// The instance marker
    #[must_use]
    pub fn marker(&self) -> &M {
        &self.marker
    }

    /// Elapsed-time origin while editing
    #[must_use]
    pub fn session_start(&self) -> i64 {
        self.session_start
    }

    /// Current render job, if any
    #[must_use]
    pub fn render_context(&self) -> Option<&RenderContext> {
        self.render.as_ref()
    }

    /// Periodic update interval
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Begin publishing
    ///
    /// Returns the delay before the first tick.
    pub fn start(&mut self) -> Duration {
        set_logging_enabled(self.options.options().logging_enabled);
        self.session_start = now_epoch_secs();
        self.marker.claim(self.client.pid());
        self.reconnect.maybe_reconnect(Instant::now(), || self.client.connect());
        tracing::debug!(pid = self.client.pid(), "Presence service started");
        self.first_tick
    }

    /// Stop publishing and give up the marker if we hold it
    pub fn stop(&mut self) {
        self.client.close();
        if self.marker.read_owner() == Some(self.client.pid()) {
            self.marker.release();
        }
        self.render = None;
        tracing::debug!("Presence service stopped");
    }

    /// A file was opened: elapsed time restarts
    pub fn on_file_loaded(&mut self) {
        self.session_start = now_epoch_secs();
    }

    /// A file was saved: take the marker back
    pub fn on_file_saved(&mut self) {
        self.marker.claim(self.client.pid());
    }

    /// A render job started
    pub fn on_render_start(&mut self) {
        self.render = Some(RenderContext::new(now_epoch_secs()));
    }

    /// A render job completed or was cancelled
    pub fn on_render_end(&mut self) {
        self.render = None;
    }

    /// One frame of the current job finished
    pub fn on_frame_rendered(&mut self) {
        if let Some(ctx) = self.render.as_mut() {
            ctx.frame_rendered();
        }
    }

    /// Periodic update
    pub fn tick(&mut self, host: &dyn HostInfo) -> TickOutcome {
        self.tick_at(host, Instant::now())
    }

    /// Manual "send test update" trigger
    pub fn send_test_update(&mut self, host: &dyn HostInfo) -> TickOutcome {
        let outcome = self.tick_at(host, Instant::now());
        tracing::info!(action = ?outcome.action, "Test update");
        outcome
    }

    /// Periodic update as of `now`
    pub fn tick_at(&mut self, host: &dyn HostInfo, now: Instant) -> TickOutcome {
        let action = self.run_tick(host, now);
        TickOutcome {
            action,
            next_tick: self.tick_interval,
        }
    }

    fn run_tick(&mut self, host: &dyn HostInfo, now: Instant) -> TickAction {
        let options = self.options.options();
        set_logging_enabled(options.logging_enabled);

        if !self.client.is_ready() {
            let reconnect_attempted = self.reconnect.maybe_reconnect(now, || self.client.connect());
            if !self.client.is_ready() {
                return TickAction::NotConnected {
                    reconnect_attempted,
                };
            }
        }

        let pid = self.client.pid();
        match self.marker.read_owner() {
            None => self.marker.claim(pid),
            Some(owner) if owner != pid => {
                tracing::debug!(owner, pid, "Another instance owns the status");
                self.client.clear();
                return TickAction::ClearedForOtherOwner { owner };
            }
            Some(_) => {}
        }

        let snapshot = compose(
            host,
            &options,
            self.render.as_ref(),
            self.session_start,
            &self.large_image_key,
        );
        self.client.update(&snapshot);
        TickAction::Updated(snapshot)
    }
}

impl<M: InstanceMarker, O: OptionsSource> Drop for PresenceService<M, O> {
    fn drop(&mut self) {
        self.client.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{FrameRange, HostVersion, StaticHostInfo};
    use crate::config::PresenceOptions;
    use crate::marker::MemoryMarker;
    use crate::transport::{Connector, MemoryConnector, MemoryPeer, Opcode};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    type TestService = PresenceService<Arc<MemoryMarker>, PresenceOptions>;

    fn config() -> PresenceConfig {
        let mut config = PresenceConfig::default();
        config.connect.initial_backoff_ms = 0;
        config.connect.handshake_timeout_ms = 100;
        config
    }

    fn host() -> StaticHostInfo {
        StaticHostInfo {
            file_name: Some("scene".to_string()),
            render_engine: "BLENDER_EEVEE_NEXT".to_string(),
            frame_range: FrameRange {
                start: 1,
                end: 100,
                current: 5,
            },
            version: HostVersion::new(4, 2, "release"),
        }
    }

    fn service_with(
        connector: &Arc<MemoryConnector>,
        marker: &Arc<MemoryMarker>,
    ) -> TestService {
        let connector: Arc<dyn Connector> = connector.clone();
        let config = config();
        let client = PresenceClient::new(connector, &config);
        PresenceService::new(client, &config, Arc::clone(marker), PresenceOptions::default())
    }

    fn started_service() -> (TestService, MemoryPeer, Arc<MemoryMarker>) {
        let peer = MemoryPeer::ready();
        let connector = Arc::new(MemoryConnector::new().then_accept(peer.clone()));
        let marker = Arc::new(MemoryMarker::new());
        let mut service = service_with(&connector, &marker);
        service.start();
        service.client().join_worker();
        (service, peer, marker)
    }

    #[test]
    fn test_start_claims_marker_and_connects() {
        let (service, _peer, marker) = started_service();
        assert_eq!(marker.read_owner(), Some(service.client().pid()));
        assert!(service.client().is_ready());
    }

    #[test]
    fn test_tick_sends_composed_snapshot() {
        let (mut service, peer, _) = started_service();

        let outcome = service.tick(&host());

        assert_eq!(outcome.next_tick, Duration::from_secs(30));
        let TickAction::Updated(snapshot) = outcome.action else {
            panic!("expected an update, got {:?}", outcome.action);
        };
        assert_eq!(snapshot.details, "Editing a project");
        assert_eq!(snapshot.state, "scene");
        assert_eq!(snapshot.start_timestamp, Some(service.session_start()));
        assert_eq!(snapshot.large_image_key, "blender");
        assert_eq!(snapshot.large_image_text, "4.2 Release");

        let json: serde_json::Value = peer.sent_frames().last().unwrap().json().unwrap();
        assert_eq!(json["args"]["activity"]["state"], "scene");
    }

    #[test]
    fn test_tick_claims_absent_marker() {
        let (mut service, _peer, marker) = started_service();
        marker.release();

        service.tick(&host());

        assert_eq!(marker.read_owner(), Some(service.client().pid()));
    }

    #[test]
    fn test_other_owner_clears_and_keeps_session() {
        let (mut service, peer, marker) = started_service();
        let other = service.client().pid().wrapping_add(1);
        marker.claim(other);

        let outcome = service.tick(&host());

        assert_eq!(outcome.action, TickAction::ClearedForOtherOwner { owner: other });
        assert!(service.client().is_ready());
        assert_eq!(marker.read_owner(), Some(other));

        let last = peer.sent_frames().pop().unwrap();
        assert_eq!(last.opcode, Opcode::Frame);
        let json: serde_json::Value = last.json().unwrap();
        assert!(json["args"].get("activity").is_none());
    }

    #[test]
    fn test_render_lifecycle() {
        let (mut service, _peer, _) = started_service();

        service.on_render_start();
        let TickAction::Updated(single) = service.tick(&host()).action else {
            panic!("expected an update");
        };
        assert_eq!(single.details, "Rendering in Eevee Next");
        assert_eq!(single.state, "Single Frame");
        assert_eq!(
            single.start_timestamp,
            service.render_context().map(|ctx| ctx.start)
        );

        service.on_frame_rendered();
        let TickAction::Updated(animation) = service.tick(&host()).action else {
            panic!("expected an update");
        };
        assert_eq!(animation.state, "Frame 5 of 100");

        service.on_render_end();
        assert!(service.render_context().is_none());
        let TickAction::Updated(editing) = service.tick(&host()).action else {
            panic!("expected an update");
        };
        assert_eq!(editing.details, "Editing a project");
    }

    #[test]
    fn test_frame_rendered_without_job_is_ignored() {
        let (mut service, _peer, _) = started_service();
        service.on_frame_rendered();
        assert!(service.render_context().is_none());
    }

    #[test]
    fn test_disconnected_tick_reconnects_with_cooldown() {
        let connector = Arc::new(MemoryConnector::new());
        let marker = Arc::new(MemoryMarker::new());
        let mut service = service_with(&connector, &marker);
        let now = Instant::now();

        let first = service.tick_at(&host(), now);
        service.client().join_worker();
        let second = service.tick_at(&host(), now + Duration::from_secs(5));
        service.client().join_worker();

        assert_eq!(
            first.action,
            TickAction::NotConnected {
                reconnect_attempted: true
            }
        );
        assert_eq!(
            second.action,
            TickAction::NotConnected {
                reconnect_attempted: false
            }
        );
        // One connect() = three attempts
        assert_eq!(connector.attempts(), 3);
    }

    #[test]
    fn test_tick_after_failure_reconnects() {
        let first = MemoryPeer::ready();
        let second = MemoryPeer::ready();
        let connector = Arc::new(
            MemoryConnector::new()
                .then_accept(first.clone())
                .then_accept(second.clone()),
        );
        let marker = Arc::new(MemoryMarker::new());
        let mut service = service_with(&connector, &marker);
        let now = Instant::now();
        service.start();
        service.client().join_worker();

        first.fail_writes(crate::transport::WriteFailure::BrokenPipe);
        service.tick_at(&host(), now);
        assert!(!service.client().is_ready());

        let outcome = service.tick_at(&host(), now + Duration::from_secs(11));
        assert_eq!(
            outcome.action,
            TickAction::NotConnected {
                reconnect_attempted: true
            }
        );
        service.client().join_worker();
        assert!(matches!(
            service.tick_at(&host(), now + Duration::from_secs(41)).action,
            TickAction::Updated(_)
        ));
        assert_eq!(second.sent_frames().len(), 2);
    }

    #[test]
    fn test_stop_releases_own_marker_only() {
        let (mut service, peer, marker) = started_service();
        service.stop();
        assert_eq!(marker.read_owner(), None);
        assert!(peer.is_closed());

        let (mut service, _peer, marker) = started_service();
        let other = service.client().pid().wrapping_add(1);
        marker.claim(other);
        service.stop();
        assert_eq!(marker.read_owner(), Some(other));
    }

    #[test]
    fn test_file_saved_reclaims_marker() {
        let (mut service, _peer, marker) = started_service();
        marker.claim(service.client().pid().wrapping_add(1));
        service.on_file_saved();
        assert_eq!(marker.read_owner(), Some(service.client().pid()));
    }

    #[test]
    fn test_send_test_update_matches_tick() {
        let (mut service, _peer, _) = started_service();
        let outcome = service.send_test_update(&host());
        assert!(matches!(outcome.action, TickAction::Updated(_)));
    }
}
