//! Metrics endpoint handler for Prometheus scraping.
//!
//! This module provides the `/metrics` endpoint handler that formats cached
//! container stats and engine state in Prometheus text format.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Handler for the /metrics endpoint.
///
/// A scrape counts as a stats consumer: it keeps the collector awake just like
/// the dashboard does.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, MetricsError> {
    let start = Instant::now();
    debug!("Processing /metrics request");
    state.health_stats.record_http_request();

    state.collector.touch();
    let samples = state.collector.cache().snapshot();
    let updates = state.checker.updates().snapshot();

    // Reset metrics before populating with fresh data
    state.metrics.reset();
    for (id, sample) in &samples {
        state.metrics.set_for_container(id, sample);
    }
    for (id, has_update) in &updates {
        state.metrics.set_update_available(id, *has_update);
    }

    state.metrics.set_update_status(&state.checker.status());
    state
        .metrics
        .collector_active
        .set(if state.collector.is_running() { 1.0 } else { 0.0 });
    state
        .metrics
        .collector_iterations
        .set(state.health_stats.total_iterations() as f64);

    // Encode metrics in Prometheus text format
    let families = state.registry.gather();
    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    let encoder = TextEncoder::new();

    if encoder.encode(&families, &mut buffer).is_err() {
        error!("Failed to encode Prometheus metrics");
        return Err(MetricsError::EncodingFailed);
    }

    state.scrape_duration.set(start.elapsed().as_secs_f64());
    debug!(
        "Metrics request completed: {} containers, {} bytes, {:.3}ms",
        samples.len(),
        buffer.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    String::from_utf8(buffer).map_err(|_| MetricsError::EncodingFailed)
}
