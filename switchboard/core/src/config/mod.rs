//! Router Configuration
//!
//! Settings come from a TOML file at `~/.config/switchboard/switchboard.toml`;
//! endpoints and the routing table come from separate data files (JSON or
//! TOML, chosen by extension).
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments ([`SettingsOverrides`])
//! 2. Environment variables (`SWITCHBOARD_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [router]
//! history_capacity = 1000
//! degrade_after_failures = 3
//! attempt_timeout_ms = 20000
//! max_concurrent_per_endpoint = 2
//! health_check_interval_ms = 30000
//! health_probe_timeout_ms = 5000
//! developer_mode = false
//! enforce_tier_compliance = false
//!
//! [files]
//! routing_table = "/etc/switchboard/routing.json"
//! endpoints = "/etc/switchboard/endpoints.toml"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::endpoint::Endpoint;
use crate::routing::engine::{EngineConfig, DEFAULT_DEGRADE_AFTER_FAILURES};
use crate::routing::error::RouterError;
use crate::routing::health::{DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_HEALTH_PROBE_TIMEOUT};
use crate::routing::history::DEFAULT_HISTORY_CAPACITY;
use crate::routing::registry::EndpointRegistry;
use crate::routing::table::RoutingTable;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("Failed to read {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to parse JSON
    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for RouterError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ValidationError(msg) => RouterError::InvalidConfiguration(msg),
            other => RouterError::InvalidConfiguration(other.to_string()),
        }
    }
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[router]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Routing records kept in memory
    pub history_capacity: Option<usize>,

    /// Consecutive failures before an endpoint is degraded
    pub degrade_after_failures: Option<u32>,

    /// Attempt timeout when neither request nor endpoint sets one
    pub attempt_timeout_ms: Option<u64>,

    /// Concurrency cap for endpoints without their own
    pub max_concurrent_per_endpoint: Option<usize>,

    /// Interval between health probe rounds
    pub health_check_interval_ms: Option<u64>,

    /// Time a single health probe may take
    pub health_probe_timeout_ms: Option<u64>,

    /// Whether control calls are accepted
    pub developer_mode: Option<bool>,

    /// Drop chain entries below the task's minimum tier
    pub enforce_tier_compliance: Option<bool>,
}

/// `[files]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesToml {
    /// Routing table file
    pub routing_table: Option<PathBuf>,

    /// Endpoint catalogue file
    pub endpoints: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardToml {
    /// Router section
    pub router: RouterToml,

    /// Data file section
    pub files: FilesToml,
}

// =============================================================================
// Router Settings
// =============================================================================

/// Effective router settings
#[derive(Clone, Debug, Serialize)]
pub struct RouterSettings {
    /// Routing records kept in memory
    pub history_capacity: usize,

    /// Consecutive failures before `available -> degraded`
    pub degrade_after_failures: u32,

    /// Attempt timeout default; `None` uses each task type's default
    pub attempt_timeout_ms: Option<u64>,

    /// Concurrency cap for endpoints without their own; `None` uses the
    /// location default (4 cloud, 1 otherwise)
    pub max_concurrent_per_endpoint: Option<usize>,

    /// Interval between health probe rounds
    pub health_check_interval_ms: u64,

    /// Time a single health probe may take before it counts as unreachable
    pub health_probe_timeout_ms: u64,

    /// Whether control calls are accepted at startup
    pub developer_mode: bool,

    /// Drop chain entries below the task's minimum tier
    pub enforce_tier_compliance: bool,

    /// Routing table file
    pub routing_table_path: Option<PathBuf>,

    /// Endpoint catalogue file
    pub endpoints_path: Option<PathBuf>,

    /// Settings file that was loaded, if any
    pub config_file_path: Option<PathBuf>,

    /// Highest-priority source that contributed a value
    pub source: ConfigSource,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            degrade_after_failures: DEFAULT_DEGRADE_AFTER_FAILURES,
            attempt_timeout_ms: None,
            max_concurrent_per_endpoint: None,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL.as_millis() as u64,
            health_probe_timeout_ms: DEFAULT_HEALTH_PROBE_TIMEOUT.as_millis() as u64,
            developer_mode: false,
            enforce_tier_compliance: false,
            routing_table_path: None,
            endpoints_path: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RouterSettings {
    /// Settings with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Interval between health probe rounds
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Time a single health probe may take
    #[must_use]
    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health_probe_timeout_ms)
    }

    /// Engine tuning derived from these settings
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            degrade_after_failures: self.degrade_after_failures,
            attempt_timeout: self.attempt_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming every bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.history_capacity == 0 {
            problems.push("history_capacity must be at least 1");
        }
        if self.degrade_after_failures == 0 {
            problems.push("degrade_after_failures must be at least 1");
        }
        if self.attempt_timeout_ms == Some(0) {
            problems.push("attempt_timeout_ms must be positive");
        }
        if self.max_concurrent_per_endpoint == Some(0) {
            problems.push("max_concurrent_per_endpoint must be at least 1");
        }
        if self.health_check_interval_ms == 0 {
            problems.push("health_check_interval_ms must be positive");
        }
        if self.health_probe_timeout_ms == 0 {
            problems.push("health_probe_timeout_ms must be positive");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(problems.join("; ")))
        }
    }
}

// =============================================================================
// Settings Loading
// =============================================================================

/// Get the default settings file path
///
/// Returns `$XDG_CONFIG_HOME/switchboard/switchboard.toml` or
/// `~/.config/switchboard/switchboard.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("switchboard").join("switchboard.toml"))
}

/// Load settings from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the settings file exists but cannot be parsed.
/// A missing file is not an error.
pub fn load_settings() -> Result<RouterSettings, ConfigError> {
    load_settings_from_path(default_config_path())
}

/// Load settings from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_settings_from_path(path: Option<PathBuf>) -> Result<RouterSettings, ConfigError> {
    let mut settings = RouterSettings::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let content = read_file(config_path)?;
            let toml_config: SwitchboardToml = toml::from_str(&content)?;
            apply_toml_config(&mut settings, &toml_config);
            settings.config_file_path = Some(config_path.clone());
            settings.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded settings from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Settings file not found, using defaults");
        }
    }

    apply_env_config(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

/// Apply TOML values to the settings
pub fn apply_toml_config(settings: &mut RouterSettings, toml: &SwitchboardToml) {
    let router = &toml.router;
    if let Some(capacity) = router.history_capacity {
        settings.history_capacity = capacity;
    }
    if let Some(threshold) = router.degrade_after_failures {
        settings.degrade_after_failures = threshold;
    }
    if router.attempt_timeout_ms.is_some() {
        settings.attempt_timeout_ms = router.attempt_timeout_ms;
    }
    if router.max_concurrent_per_endpoint.is_some() {
        settings.max_concurrent_per_endpoint = router.max_concurrent_per_endpoint;
    }
    if let Some(interval) = router.health_check_interval_ms {
        settings.health_check_interval_ms = interval;
    }
    if let Some(timeout) = router.health_probe_timeout_ms {
        settings.health_probe_timeout_ms = timeout;
    }
    if let Some(enabled) = router.developer_mode {
        settings.developer_mode = enabled;
    }
    if let Some(enforce) = router.enforce_tier_compliance {
        settings.enforce_tier_compliance = enforce;
    }

    if toml.files.routing_table.is_some() {
        settings.routing_table_path = toml.files.routing_table.clone();
    }
    if toml.files.endpoints.is_some() {
        settings.endpoints_path = toml.files.endpoints.clone();
    }
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply `SWITCHBOARD_*` overrides looked up through `var`
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_config(settings: &mut RouterSettings, var: impl Fn(&str) -> Option<String>) {
    fn numeric<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
        let parsed = value.parse().ok();
        if parsed.is_none() {
            tracing::warn!(key, value, "Ignoring unparseable environment override");
        }
        parsed
    }

    let mut touched = false;

    if let Some(v) = var("SWITCHBOARD_HISTORY_CAPACITY") {
        if let Some(n) = numeric("SWITCHBOARD_HISTORY_CAPACITY", &v) {
            settings.history_capacity = n;
            touched = true;
        }
    }
    if let Some(v) = var("SWITCHBOARD_DEGRADE_AFTER") {
        if let Some(n) = numeric("SWITCHBOARD_DEGRADE_AFTER", &v) {
            settings.degrade_after_failures = n;
            touched = true;
        }
    }
    if let Some(v) = var("SWITCHBOARD_ATTEMPT_TIMEOUT_MS") {
        if let Some(ms) = numeric("SWITCHBOARD_ATTEMPT_TIMEOUT_MS", &v) {
            settings.attempt_timeout_ms = Some(ms);
            touched = true;
        }
    }
    if let Some(v) = var("SWITCHBOARD_MAX_CONCURRENT") {
        if let Some(n) = numeric("SWITCHBOARD_MAX_CONCURRENT", &v) {
            settings.max_concurrent_per_endpoint = Some(n);
            touched = true;
        }
    }
    if let Some(v) = var("SWITCHBOARD_HEALTH_INTERVAL_MS") {
        if let Some(ms) = numeric("SWITCHBOARD_HEALTH_INTERVAL_MS", &v) {
            settings.health_check_interval_ms = ms;
            touched = true;
        }
    }
    if let Some(v) = var("SWITCHBOARD_HEALTH_PROBE_TIMEOUT_MS") {
        if let Some(ms) = numeric("SWITCHBOARD_HEALTH_PROBE_TIMEOUT_MS", &v) {
            settings.health_probe_timeout_ms = ms;
            touched = true;
        }
    }
    if let Some(v) = var("SWITCHBOARD_DEVELOPER_MODE") {
        settings.developer_mode = parse_flag(&v);
        touched = true;
    }
    if let Some(v) = var("SWITCHBOARD_ENFORCE_TIER") {
        settings.enforce_tier_compliance = parse_flag(&v);
        touched = true;
    }
    if let Some(v) = var("SWITCHBOARD_ROUTING_TABLE") {
        settings.routing_table_path = Some(PathBuf::from(v));
        touched = true;
    }
    if let Some(v) = var("SWITCHBOARD_ENDPOINTS") {
        settings.endpoints_path = Some(PathBuf::from(v));
        touched = true;
    }

    if touched {
        settings.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_settings`]
#[derive(Clone, Debug, Default)]
pub struct SettingsOverrides {
    /// Routing table file
    pub routing_table_path: Option<PathBuf>,

    /// Endpoint catalogue file
    pub endpoints_path: Option<PathBuf>,

    /// Developer mode
    pub developer_mode: Option<bool>,

    /// Tier compliance filter
    pub enforce_tier_compliance: Option<bool>,

    /// Attempt timeout default
    pub attempt_timeout_ms: Option<u64>,
}

impl SettingsOverrides {
    /// Empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the routing table file
    #[must_use]
    pub fn with_routing_table(mut self, path: PathBuf) -> Self {
        self.routing_table_path = Some(path);
        self
    }

    /// Override the endpoint catalogue file
    #[must_use]
    pub fn with_endpoints(mut self, path: PathBuf) -> Self {
        self.endpoints_path = Some(path);
        self
    }

    /// Override developer mode
    #[must_use]
    pub fn with_developer_mode(mut self, enabled: bool) -> Self {
        self.developer_mode = Some(enabled);
        self
    }

    /// Override the tier compliance filter
    #[must_use]
    pub fn with_tier_compliance(mut self, enforce: bool) -> Self {
        self.enforce_tier_compliance = Some(enforce);
        self
    }

    /// Override the attempt timeout default
    #[must_use]
    pub fn with_attempt_timeout_ms(mut self, ms: u64) -> Self {
        self.attempt_timeout_ms = Some(ms);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routing_table_path.is_none()
            && self.endpoints_path.is_none()
            && self.developer_mode.is_none()
            && self.enforce_tier_compliance.is_none()
            && self.attempt_timeout_ms.is_none()
    }

    /// Apply overrides to settings
    pub fn apply(&self, settings: &mut RouterSettings) {
        if self.is_empty() {
            return;
        }
        settings.source = ConfigSource::Cli;

        if let Some(ref path) = self.routing_table_path {
            settings.routing_table_path = Some(path.clone());
        }
        if let Some(ref path) = self.endpoints_path {
            settings.endpoints_path = Some(path.clone());
        }
        if let Some(enabled) = self.developer_mode {
            settings.developer_mode = enabled;
        }
        if let Some(enforce) = self.enforce_tier_compliance {
            settings.enforce_tier_compliance = enforce;
        }
        if self.attempt_timeout_ms.is_some() {
            settings.attempt_timeout_ms = self.attempt_timeout_ms;
        }
    }
}

// =============================================================================
// Data Files
// =============================================================================

/// Interchange format of a data file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataFormat {
    /// JSON
    Json,
    /// TOML
    Toml,
}

impl DataFormat {
    /// Format implied by the file extension; anything but `.toml` is JSON
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Endpoint catalogue: a bare JSON array, or `endpoints = [...]`
#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointsFile {
    Wrapped { endpoints: Vec<Endpoint> },
    List(Vec<Endpoint>),
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_data<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = read_file(path)?;
    match DataFormat::from_path(path) {
        DataFormat::Toml => Ok(toml::from_str(&content)?),
        DataFormat::Json => Ok(serde_json::from_str(&content)?),
    }
}

/// Read an endpoint catalogue
///
/// # Errors
///
/// Read and parse failures.
pub fn load_endpoints(path: &Path) -> Result<Vec<Endpoint>, ConfigError> {
    let endpoints = match parse_data::<EndpointsFile>(path)? {
        EndpointsFile::Wrapped { endpoints } | EndpointsFile::List(endpoints) => endpoints,
    };
    tracing::info!(path = %path.display(), count = endpoints.len(), "Loaded endpoints");
    Ok(endpoints)
}

/// Read an endpoint catalogue into a registry
///
/// # Errors
///
/// Read and parse failures, invalid endpoints, duplicate ids.
pub fn load_registry(path: &Path) -> Result<EndpointRegistry, ConfigError> {
    EndpointRegistry::from_endpoints(load_endpoints(path)?)
        .map_err(|e| ConfigError::ValidationError(e.to_string()))
}

/// Read a routing table
///
/// The table is not validated here; see [`RoutingTable::validate`].
///
/// # Errors
///
/// Read and parse failures.
pub fn load_routing_table(path: &Path) -> Result<RoutingTable, ConfigError> {
    let table: RoutingTable = parse_data(path)?;
    tracing::info!(
        path = %path.display(),
        rules = table.auto_routing_rules.len(),
        "Loaded routing table"
    );
    Ok(table)
}

// =============================================================================
// Tests
// =============================================================================
