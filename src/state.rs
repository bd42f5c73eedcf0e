//! Application state management for the server.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers and owned by the background engine tasks.

use dockpanel::{ContainerRuntime, HealthStats, StatsCollector, UpdateChecker};
use prometheus::{Gauge, Registry};
use std::sync::Arc;

use crate::metrics::ContainerMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests and background tasks.
pub struct AppState {
    pub registry: Registry,
    pub metrics: ContainerMetrics,
    pub scrape_duration: Gauge,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub collector: Arc<StatsCollector>,
    pub checker: Arc<UpdateChecker>,
    pub health_stats: Arc<HealthStats>,
}
