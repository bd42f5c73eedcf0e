//! Config command implementation.
//!
//! Generates configuration files in various formats.

use anyhow::Result;
use dockpanel::Config;
use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;

/// Generates configuration files
pub fn command_config(output: Option<PathBuf>, format: ConfigFormat, commented: bool) -> Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("dockpanel.yaml"));

    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
        ConfigFormat::Yaml => {
            let mut content = serde_yaml::to_string(&config)?;
            if commented {
                content = add_config_comments(content);
            }
            content
        }
    };

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# dockpanel Configuration
# ========================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"                    # Bind IP (0.0.0.0 = all interfaces)
# port: 9216                         # HTTP port
#
# Container Runtime
# -----------------
# docker_socket: null                # Daemon socket (null = DOCKER_HOST or platform default)
#
# Stats Collection
# ----------------
# poll_interval_ms: 5000             # Time between collector iterations
# stats_timeout_ms: null             # Per-container fetch timeout (null = 2.5 x poll interval)
# activity_window_secs: 30           # Stop polling this long after the last read
# stats_concurrency: 5               # Concurrent stats fetches per iteration
#
# Update Checks
# -------------
# update_min_interval_secs: 300      # Unforced checks closer together than this are skipped
# pull_idle_timeout_secs: 60         # Abort a pull that shows no progress for this long
# pull_total_timeout_secs: 600       # Abort a pull that runs longer than this
# update_check_interval_secs: 3600   # Scheduled check interval (0 = disabled)
#
# Feature Flags
# -------------
# enable_health: true                # Enable /health endpoint
# enable_metrics: true               # Enable /metrics endpoint
#
# Logging
# -------
# log_level: "info"                  # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}
