//! HTTP endpoint handlers for the server.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/api/docker/*`: Dashboard container panel endpoints
//! - `/metrics`: Prometheus metrics endpoint
//! - `/health`: Health check endpoint

pub mod docker;
pub mod health;
pub mod metrics;

// Re-export handlers
pub use docker::{check_updates_handler, containers_handler, update_status_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;
