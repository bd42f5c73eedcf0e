//! Prometheus metrics definitions for dockpanel.
//!
//! This module defines the Prometheus metrics used to export cached container
//! stats, update availability and the engine's own state.

use dockpanel::{StatsSample, UpdateCheckStatus};
use prometheus::{Gauge, GaugeVec, Opts, Registry};

/// Collection of Prometheus metrics for container monitoring.
#[derive(Clone)]
pub struct ContainerMetrics {
    pub cpu_percent: GaugeVec,
    pub memory_usage: GaugeVec,
    pub memory_limit: GaugeVec,
    pub memory_percent: GaugeVec,
    pub network_rx: GaugeVec,
    pub network_tx: GaugeVec,
    pub block_read: GaugeVec,
    pub block_write: GaugeVec,
    pub update_available: GaugeVec,

    // Engine state
    pub collector_active: Gauge,
    pub collector_iterations: Gauge,
    pub update_check_in_progress: Gauge,
    pub update_check_checked: Gauge,
    pub update_check_total: Gauge,
    pub update_check_failures: Gauge,
}

fn gauge_vec(registry: &Registry, name: &str, help: &str) -> prometheus::Result<GaugeVec> {
    let g = GaugeVec::new(Opts::new(name, help), &["id"])?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<Gauge> {
    let g = Gauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

impl ContainerMetrics {
    /// Creates and registers all Prometheus metrics with the registry.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            cpu_percent: gauge_vec(
                registry,
                "dockpanel_container_cpu_percent",
                "CPU usage per container in percent of one core",
            )?,
            memory_usage: gauge_vec(
                registry,
                "dockpanel_container_memory_usage_bytes",
                "Working-set memory per container in bytes",
            )?,
            memory_limit: gauge_vec(
                registry,
                "dockpanel_container_memory_limit_bytes",
                "Memory limit per container in bytes",
            )?,
            memory_percent: gauge_vec(
                registry,
                "dockpanel_container_memory_percent",
                "Working-set memory per container in percent of its limit",
            )?,
            network_rx: gauge_vec(
                registry,
                "dockpanel_container_network_rx_bytes",
                "Bytes received per container over all interfaces",
            )?,
            network_tx: gauge_vec(
                registry,
                "dockpanel_container_network_tx_bytes",
                "Bytes transmitted per container over all interfaces",
            )?,
            block_read: gauge_vec(
                registry,
                "dockpanel_container_block_read_bytes",
                "Bytes read from block devices per container",
            )?,
            block_write: gauge_vec(
                registry,
                "dockpanel_container_block_write_bytes",
                "Bytes written to block devices per container",
            )?,
            update_available: gauge_vec(
                registry,
                "dockpanel_container_update_available",
                "Whether a newer image exists for the container's tag (1) or not (0)",
            )?,
            collector_active: gauge(
                registry,
                "dockpanel_stats_collector_active",
                "Whether the stats collector loop is running (1) or idle (0)",
            )?,
            collector_iterations: gauge(
                registry,
                "dockpanel_stats_collector_iterations",
                "Number of completed stats collector iterations",
            )?,
            update_check_in_progress: gauge(
                registry,
                "dockpanel_update_check_in_progress",
                "Whether an update check is currently running (1) or not (0)",
            )?,
            update_check_checked: gauge(
                registry,
                "dockpanel_update_check_checked",
                "Containers checked so far in the current or last update check",
            )?,
            update_check_total: gauge(
                registry,
                "dockpanel_update_check_total",
                "Containers targeted by the current or last update check",
            )?,
            update_check_failures: gauge(
                registry,
                "dockpanel_update_check_failures",
                "Containers whose image could not be checked in the last update check",
            )?,
        })
    }

    /// Resets all per-container metrics (used before updating with fresh data).
    pub fn reset(&self) {
        self.cpu_percent.reset();
        self.memory_usage.reset();
        self.memory_limit.reset();
        self.memory_percent.reset();
        self.network_rx.reset();
        self.network_tx.reset();
        self.block_read.reset();
        self.block_write.reset();
        self.update_available.reset();
    }

    /// Sets metric values for one container sample.
    pub fn set_for_container(&self, id: &str, sample: &StatsSample) {
        let labels = &[id];
        self.cpu_percent
            .with_label_values(labels)
            .set(sample.cpu_percent);
        self.memory_usage
            .with_label_values(labels)
            .set(sample.mem_usage as f64);
        self.memory_limit
            .with_label_values(labels)
            .set(sample.mem_limit as f64);
        self.memory_percent
            .with_label_values(labels)
            .set(sample.mem_percent);
        self.network_rx
            .with_label_values(labels)
            .set(sample.net_io.rx as f64);
        self.network_tx
            .with_label_values(labels)
            .set(sample.net_io.tx as f64);
        self.block_read
            .with_label_values(labels)
            .set(sample.block_io.read as f64);
        self.block_write
            .with_label_values(labels)
            .set(sample.block_io.write as f64);
    }

    pub fn set_update_available(&self, id: &str, has_update: bool) {
        self.update_available
            .with_label_values(&[id])
            .set(if has_update { 1.0 } else { 0.0 });
    }

    pub fn set_update_status(&self, status: &UpdateCheckStatus) {
        self.update_check_in_progress
            .set(if status.is_checking { 1.0 } else { 0.0 });
        self.update_check_checked.set(status.checked_count as f64);
        self.update_check_total.set(status.total_count as f64);
        self.update_check_failures.set(status.failures.len() as f64);
    }
}
