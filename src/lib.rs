//! Container telemetry and image update-check engine.
//!
//! The engine polls resource statistics for running containers into an
//! in-memory cache while consumers are asking for them, and separately checks
//! whether newer images exist for the tags containers are running.

pub mod cache;
pub mod collector;
pub mod config;
pub mod health_stats;
pub mod runtime;
pub mod stats;
pub mod updates;

pub use cache::{StatsCache, UpdateCache};
pub use collector::{CollectorSettings, StatsCollector};
pub use config::Config;
pub use health_stats::HealthStats;
pub use runtime::{ContainerRuntime, ContainerSummary, RuntimeError};
pub use stats::StatsSample;
pub use updates::{UpdateCheckStatus, UpdateChecker, UpdateSettings};
