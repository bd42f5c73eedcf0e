//! Check-updates command implementation.
//!
//! Runs one forced update check and prints the final status.

use anyhow::{Context, Result};
use dockpanel::runtime::DockerRuntime;
use dockpanel::{Config, UpdateCache, UpdateChecker};
use serde::Serialize;
use std::sync::Arc;

use crate::cli::OutputFormat;

#[derive(Serialize)]
struct UpdateRow {
    id: String,
    has_update: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    status: dockpanel::UpdateCheckStatus,
    containers: Vec<UpdateRow>,
}

/// Runs a forced update check and prints the result.
pub async fn command_check_updates(format: OutputFormat, config: &Config) -> Result<()> {
    let runtime = DockerRuntime::connect(config.docker_socket.as_deref())
        .context("Failed to connect to Docker daemon")?;
    let checker = UpdateChecker::new(
        Arc::new(runtime),
        Arc::new(UpdateCache::new()),
        config.update_settings(),
    );

    checker.check_now(true).await;

    let mut containers: Vec<UpdateRow> = checker
        .updates()
        .snapshot()
        .into_iter()
        .map(|(id, has_update)| UpdateRow { id, has_update })
        .collect();
    containers.sort_by(|a, b| a.id.cmp(&b.id));

    let report = Report {
        status: checker.status(),
        containers,
    };
    let output = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&report)?,
        OutputFormat::Yaml => serde_yaml::to_string(&report)?,
    };
    println!("{output}");

    if let Some(err) = &report.status.last_error {
        anyhow::bail!("Update check failed: {}", err);
    }
    Ok(())
}
