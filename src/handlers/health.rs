//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that returns
//! collector statistics and update-check state as plain text.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use dockpanel::UpdateCheckStatus;
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.health_stats.record_http_request();

    let message = if state.collector.is_running() {
        "OK - Stats collector running"
    } else {
        "OK - Stats collector idle"
    };

    let table = state.health_stats.render_table();
    let updates = render_update_status(&state.checker.status());

    debug!("Health check: {}", message);
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!(
            "{message}\n\ncached container samples: {}\n\n{table}\n{updates}",
            state.collector.cache().len()
        ),
    )
}

/// Renders the update check status as a plain-text section.
fn render_update_status(status: &UpdateCheckStatus) -> String {
    let mut out = String::new();
    writeln!(out, "UPDATE CHECK").ok();
    writeln!(out, "============").ok();
    writeln!(out).ok();

    let last = status
        .last_check_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    writeln!(out, "{:16} {}", "last check:", last).ok();
    writeln!(out, "{:16} {}", "in progress:", status.is_checking).ok();
    writeln!(
        out,
        "{:16} {}/{}",
        "checked:", status.checked_count, status.total_count
    )
    .ok();
    writeln!(out, "{:16} {}", "updates:", status.update_count).ok();
    if let Some(err) = &status.last_error {
        writeln!(out, "{:16} {}", "last error:", err).ok();
    }

    if !status.failures.is_empty() {
        writeln!(out).ok();
        writeln!(out, "{:25} | {}", "Container", "Error").ok();
        writeln!(out, "{}", "-".repeat(66)).ok();
        for failure in &status.failures {
            writeln!(out, "{:25} | {}", failure.name, failure.error).ok();
        }
    }
    out
}
