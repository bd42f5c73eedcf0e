//! Configuration file handling.
//!
//! Every setting is optional in the file; unset values fall back to the
//! defaults below. Files may be YAML (default), JSON or TOML, chosen by
//! extension.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::collector::{CollectorSettings, DEFAULT_CONCURRENCY};
use crate::updates::UpdateSettings;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_ACTIVITY_WINDOW_SECS: u64 = 30;
pub const DEFAULT_UPDATE_MIN_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_PULL_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PULL_TOTAL_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_UPDATE_CHECK_INTERVAL_SECS: u64 = 3600;

/// Config file locations tried when none is given on the command line.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "/etc/dockpanel/dockpanel.yaml",
    "/etc/dockpanel/dockpanel.yml",
    "/etc/dockpanel/dockpanel.json",
    "./dockpanel.yaml",
    "./dockpanel.yml",
    "./dockpanel.json",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Container runtime
    /// Docker daemon socket; platform default when unset.
    #[serde(alias = "docker-socket")]
    pub docker_socket: Option<String>,

    // Stats collection
    #[serde(alias = "poll-interval-ms")]
    pub poll_interval_ms: Option<u64>,
    /// Per-container stats fetch timeout; 2.5 × poll interval when unset.
    #[serde(alias = "stats-timeout-ms")]
    pub stats_timeout_ms: Option<u64>,
    #[serde(alias = "activity-window-secs")]
    pub activity_window_secs: Option<u64>,
    #[serde(alias = "stats-concurrency")]
    pub stats_concurrency: Option<usize>,

    // Update checks
    #[serde(alias = "update-min-interval-secs")]
    pub update_min_interval_secs: Option<u64>,
    #[serde(alias = "pull-idle-timeout-secs")]
    pub pull_idle_timeout_secs: Option<u64>,
    #[serde(alias = "pull-total-timeout-secs")]
    pub pull_total_timeout_secs: Option<u64>,
    /// Background check interval; 0 disables scheduled checks.
    #[serde(alias = "update-check-interval-secs")]
    pub update_check_interval_secs: Option<u64>,

    // Feature flags
    pub enable_health: Option<bool>,
    pub enable_metrics: Option<bool>,

    // Logging
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            docker_socket: None,
            poll_interval_ms: Some(DEFAULT_POLL_INTERVAL_MS),
            stats_timeout_ms: None,
            activity_window_secs: Some(DEFAULT_ACTIVITY_WINDOW_SECS),
            stats_concurrency: Some(DEFAULT_CONCURRENCY),
            update_min_interval_secs: Some(DEFAULT_UPDATE_MIN_INTERVAL_SECS),
            pull_idle_timeout_secs: Some(DEFAULT_PULL_IDLE_TIMEOUT_SECS),
            pull_total_timeout_secs: Some(DEFAULT_PULL_TOTAL_TIMEOUT_SECS),
            update_check_interval_secs: Some(DEFAULT_UPDATE_CHECK_INTERVAL_SECS),
            enable_health: Some(true),
            enable_metrics: Some(true),
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    /// Collector settings with defaults filled in.
    pub fn collector_settings(&self) -> CollectorSettings {
        let interval =
            Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS));
        let mut settings = CollectorSettings::with_interval(interval);
        if let Some(ms) = self.stats_timeout_ms {
            settings.fetch_timeout = Duration::from_millis(ms);
        }
        settings.activity_window = Duration::from_secs(
            self.activity_window_secs
                .unwrap_or(DEFAULT_ACTIVITY_WINDOW_SECS),
        );
        settings.concurrency = self.stats_concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        settings
    }

    /// Update checker settings with defaults filled in.
    pub fn update_settings(&self) -> UpdateSettings {
        UpdateSettings {
            min_interval: Duration::from_secs(
                self.update_min_interval_secs
                    .unwrap_or(DEFAULT_UPDATE_MIN_INTERVAL_SECS),
            ),
            pull_idle_timeout: Duration::from_secs(
                self.pull_idle_timeout_secs
                    .unwrap_or(DEFAULT_PULL_IDLE_TIMEOUT_SECS),
            ),
            pull_total_timeout: Duration::from_secs(
                self.pull_total_timeout_secs
                    .unwrap_or(DEFAULT_PULL_TOTAL_TIMEOUT_SECS),
            ),
        }
    }

    /// Interval for scheduled update checks, `None` when disabled.
    pub fn update_check_interval(&self) -> Option<Duration> {
        match self
            .update_check_interval_secs
            .unwrap_or(DEFAULT_UPDATE_CHECK_INTERVAL_SECS)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.poll_interval_ms == Some(0) {
        bail!("poll_interval_ms must be greater than 0");
    }
    if cfg.stats_timeout_ms == Some(0) {
        bail!("stats_timeout_ms must be greater than 0");
    }
    if cfg.stats_concurrency == Some(0) {
        bail!("stats_concurrency must be at least 1");
    }
    if cfg.activity_window_secs == Some(0) {
        bail!("activity_window_secs must be greater than 0");
    }

    let updates = cfg.update_settings();
    if updates.pull_idle_timeout.is_zero() || updates.pull_total_timeout.is_zero() {
        bail!("pull_idle_timeout_secs and pull_total_timeout_secs must be greater than 0");
    }
    if updates.pull_idle_timeout >= updates.pull_total_timeout {
        bail!(
            "pull_idle_timeout_secs ({}) must be shorter than pull_total_timeout_secs ({})",
            updates.pull_idle_timeout.as_secs(),
            updates.pull_total_timeout.as_secs()
        );
    }

    if let Some(level) = cfg.log_level.as_deref() {
        match level {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => {}
            other => bail!(
                "Invalid log_level '{}', expected one of off/error/warn/info/debug/trace",
                other
            ),
        }
    }

    Ok(())
}

/// Loads configuration from `path`, or from the first default location that
/// exists. Returns the defaults when no file is found.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
        {
            Some(p) => p,
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON config {}", path.display()))?,
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Invalid TOML config {}", path.display()))?,
        _ => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML config {}", path.display()))?,
    };

    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}
