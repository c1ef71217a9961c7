//! TOML Configuration File Support
//!
//! Centralized configuration for the presence client, loaded from
//! `~/.config/blender-presence/presence.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! application_id = "674448359850901546"
//! large_image_key = "blender"
//!
//! [connect]
//! attempts = 3
//! initial_backoff_ms = 250
//! handshake_timeout_ms = 3000
//! # endpoint = "/run/user/1000/discord-ipc-0"
//!
//! [reconnect]
//! cooldown_secs = 10
//! tick_interval_secs = 30
//!
//! [marker]
//! # path = "/tmp/BlendRpcPid"
//!
//! [options]
//! show_elapsed_time = true
//! show_elapsed_time_while_rendering = true
//! rendering_display_mode = "by_engine_name"
//! logging_enabled = false
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::IpcConnector;

/// Application identifier registered with the chat service for Blender
pub const DEFAULT_APPLICATION_ID: &str = "674448359850901546";

/// Uploaded asset key of the Blender logo
pub const DEFAULT_LARGE_IMAGE_KEY: &str = "blender";

/// Where users should report a rejected application identifier
pub const DEFAULT_SUPPORT_URL: &str = "https://github.com/Protinon/Blender-rpc/issues";

/// File name of the instance marker inside the temp directory
pub const MARKER_FILE_NAME: &str = "BlendRpcPid";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the effective configuration came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Configuration Structures
// =============================================================================

/// Connection attempt settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Total connection attempts per `connect()`, the first one included
    ///
    /// This counts attempts, not retries: the default of 3 means one initial
    /// attempt and at most two retries.
    pub attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay
    pub max_backoff_ms: u64,
    /// Growth factor between delays
    pub backoff_multiplier: f64,
    /// How long to wait for the handshake acknowledgement
    pub handshake_timeout_ms: u64,
    /// Bound on a single write (0 = no bound)
    pub write_timeout_ms: u64,
    /// Explicit endpoint path; replaces discovery when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<PathBuf>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2000,
            backoff_multiplier: 2.0,
            handshake_timeout_ms: 3000,
            write_timeout_ms: 500,
            endpoint: None,
        }
    }
}

impl ConnectConfig {
    /// Handshake acknowledgement timeout
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Write timeout
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// `initial * multiplier^(attempt-1)`, capped at `max_backoff_ms`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Reconnection and tick settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Minimum time between two reconnect attempts
    pub cooldown_secs: u64,
    /// Interval between periodic updates
    pub tick_interval_secs: u64,
    /// Delay before the first periodic update
    pub first_tick_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 10,
            tick_interval_secs: 30,
            first_tick_secs: 1,
        }
    }
}

impl ReconnectConfig {
    /// Reconnect cooldown
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Periodic update interval
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Delay before the first update
    #[must_use]
    pub fn first_tick(&self) -> Duration {
        Duration::from_secs(self.first_tick_secs)
    }
}

/// Instance marker settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Marker file location (None = `<tmp>/BlendRpcPid`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl MarkerConfig {
    /// Effective marker path
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(MARKER_FILE_NAME))
    }
}

/// What to show in the first line while rendering
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderingDisplayMode {
    /// "Rendering in Cycles"
    #[default]
    ByEngineName,
    /// "Rendering scene" (falls back to the engine for unsaved files)
    ByFileName,
}

/// User-facing options, read fresh on every update
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceOptions {
    /// Show time since the file was opened while editing
    pub show_elapsed_time: bool,
    /// Show time since the render started while rendering
    pub show_elapsed_time_while_rendering: bool,
    /// First line while rendering
    pub rendering_display_mode: RenderingDisplayMode,
    /// Emit log output
    pub logging_enabled: bool,
}

impl Default for PresenceOptions {
    fn default() -> Self {
        Self {
            show_elapsed_time: true,
            show_elapsed_time_while_rendering: true,
            rendering_display_mode: RenderingDisplayMode::default(),
            logging_enabled: false,
        }
    }
}

/// Read-only access to the current options
///
/// Implemented for a fixed `PresenceOptions` and for a shared
/// `RwLock<PresenceOptions>` that a preferences UI may change at any time.
pub trait OptionsSource: Send + Sync {
    /// Snapshot of the options as they are right now
    fn options(&self) -> PresenceOptions;
}

impl OptionsSource for PresenceOptions {
    fn options(&self) -> PresenceOptions {
        self.clone()
    }
}

impl OptionsSource for RwLock<PresenceOptions> {
    fn options(&self) -> PresenceOptions {
        self.read().clone()
    }
}

impl<T: OptionsSource + ?Sized> OptionsSource for Arc<T> {
    fn options(&self) -> PresenceOptions {
        (**self).options()
    }
}

/// Complete presence configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Application identifier sent in the handshake
    pub application_id: String,
    /// Asset key of the large image
    pub large_image_key: String,
    /// Support pointer logged when the identifier is rejected
    pub support_url: String,
    /// Connection attempts
    pub connect: ConnectConfig,
    /// Reconnection policy
    pub reconnect: ReconnectConfig,
    /// Instance marker
    pub marker: MarkerConfig,
    /// Initial user options
    pub options: PresenceOptions,

    /// Path to the config file that was loaded (if any)
    #[serde(skip)]
    config_file_path: Option<PathBuf>,

    /// Where the configuration was loaded from
    #[serde(skip)]
    source: ConfigSource,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            application_id: DEFAULT_APPLICATION_ID.to_string(),
            large_image_key: DEFAULT_LARGE_IMAGE_KEY.to_string(),
            support_url: DEFAULT_SUPPORT_URL.to_string(),
            connect: ConnectConfig::default(),
            reconnect: ReconnectConfig::default(),
            marker: MarkerConfig::default(),
            options: PresenceOptions::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl PresenceConfig {
    /// Create a new configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the configuration source
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Path of the file this configuration was read from
    #[must_use]
    pub fn config_file_path(&self) -> Option<&PathBuf> {
        self.config_file_path.as_ref()
    }

    /// Connector for the configured endpoint, or discovery when none is set
    #[must_use]
    pub fn connector(&self) -> IpcConnector {
        let connector = match &self.connect.endpoint {
            Some(path) => IpcConnector::with_endpoint(path.clone()),
            None => IpcConnector::discover(),
        };
        connector.with_write_timeout(self.connect.write_timeout())
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_id.is_empty()
            || !self.application_id.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ConfigError::ValidationError(format!(
                "application_id must be a non-empty decimal id, got {:?}",
                self.application_id
            )));
        }
        if self.connect.attempts == 0 {
            return Err(ConfigError::ValidationError(
                "connect.attempts must be at least 1".to_string(),
            ));
        }
        if self.connect.handshake_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect.handshake_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.connect.backoff_multiplier.is_nan() || self.connect.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "connect.backoff_multiplier must be >= 1.0, got {}",
                self.connect.backoff_multiplier
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/blender-presence/presence.toml` or the platform
/// equivalent.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("blender-presence").join("presence.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<PresenceConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then apply the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read, parsed or
/// validated.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<PresenceConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Same as `load_config_from_path`, reading overrides through `lookup`
///
/// # Errors
///
/// See `load_config_from_path`.
pub fn load_config_with_env<F>(path: Option<PathBuf>, lookup: F) -> Result<PresenceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = PresenceConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            config = toml::from_str(&toml_content)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, lookup);
    config.validate()?;

    Ok(config)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Apply environment variable overrides to the config
///
/// Unparseable values are ignored, leaving the previous value in place.
fn apply_env_config<F>(config: &mut PresenceConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(id) = lookup("PRESENCE_APP_ID") {
        config.application_id = id;
        config.source = ConfigSource::Env;
    }
    if let Some(endpoint) = lookup("PRESENCE_ENDPOINT") {
        config.connect.endpoint = Some(PathBuf::from(endpoint));
        config.source = ConfigSource::Env;
    }
    if let Some(attempts) = lookup("PRESENCE_CONNECT_ATTEMPTS") {
        if let Ok(n) = attempts.parse::<u32>() {
            config.connect.attempts = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(timeout) = lookup("PRESENCE_HANDSHAKE_TIMEOUT") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.connect.handshake_timeout_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(cooldown) = lookup("PRESENCE_RECONNECT_COOLDOWN") {
        if let Ok(secs) = cooldown.parse::<u64>() {
            config.reconnect.cooldown_secs = secs;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(marker) = lookup("PRESENCE_MARKER") {
        config.marker.path = Some(PathBuf::from(marker));
        config.source = ConfigSource::Env;
    }
    if let Some(log) = lookup("PRESENCE_LOG") {
        config.options.logging_enabled = parse_flag(&log);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// Tests
// =============================================================================
