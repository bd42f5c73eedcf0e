//! Container resource metrics derived from runtime statistics snapshots.
//!
//! A raw snapshot carries monotonic counters for the current and the previous
//! read (`cpu_stats` / `precpu_stats`), so a single snapshot is enough to
//! derive a CPU percentage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Raw statistics snapshot in the Docker Engine JSON shape.
///
/// Only the fields used for [`StatsSample`] are modelled; everything is
/// optional because daemons differ in what they report (cgroup v1 vs v2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStats {
    #[serde(default)]
    pub cpu_stats: Option<RawCpuStats>,
    #[serde(default)]
    pub precpu_stats: Option<RawCpuStats>,
    #[serde(default)]
    pub memory_stats: Option<RawMemoryStats>,
    #[serde(default)]
    pub networks: Option<HashMap<String, RawNetworkStats>>,
    #[serde(default)]
    pub blkio_stats: Option<RawBlkioStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCpuStats {
    #[serde(default)]
    pub cpu_usage: Option<RawCpuUsage>,
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
    #[serde(default)]
    pub online_cpus: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCpuUsage {
    #[serde(default)]
    pub total_usage: Option<u64>,
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMemoryStats {
    #[serde(default)]
    pub usage: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub stats: Option<RawMemoryDetail>,
}

/// Reclaimable memory counters (`cache` on cgroup v1, `inactive_file` on v2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMemoryDetail {
    #[serde(default)]
    pub cache: Option<u64>,
    #[serde(default)]
    pub inactive_file: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNetworkStats {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBlkioStats {
    #[serde(default)]
    pub io_service_bytes_recursive: Option<Vec<RawBlkioEntry>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBlkioEntry {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub value: u64,
}

impl RawStats {
    /// Decodes a snapshot from engine JSON. An undecodable snapshot becomes an
    /// empty one, which computes to an all-zero sample.
    pub fn from_json(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|e| {
            debug!("Discarding undecodable stats snapshot: {}", e);
            RawStats::default()
        })
    }
}

/// Received/transmitted bytes summed over all interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetIo {
    pub rx: u64,
    pub tx: u64,
}

/// Bytes read/written summed over all block devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlockIo {
    pub read: u64,
    pub write: u64,
}

/// Derived metrics for one container at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSample {
    pub cpu_percent: f64,
    pub mem_usage: u64,
    pub mem_limit: u64,
    pub mem_percent: f64,
    #[serde(rename = "netIO")]
    pub net_io: NetIo,
    #[serde(rename = "blockIO")]
    pub block_io: BlockIo,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub captured_at: DateTime<Utc>,
}

impl StatsSample {
    /// Computes a sample from a raw snapshot.
    pub fn compute(raw: &RawStats, captured_at: DateTime<Utc>) -> Self {
        let (mem_usage, mem_limit, mem_percent) = memory_usage(raw);
        Self {
            cpu_percent: cpu_percent(raw),
            mem_usage,
            mem_limit,
            mem_percent,
            net_io: network_io(raw),
            block_io: block_io(raw),
            captured_at,
        }
    }
}

/// CPU usage over the interval between `precpu_stats` and `cpu_stats`,
/// scaled so one fully used core is 100%.
pub fn cpu_percent(raw: &RawStats) -> f64 {
    let (Some(cpu), Some(pre)) = (&raw.cpu_stats, &raw.precpu_stats) else {
        return 0.0;
    };

    let total = cpu.cpu_usage.as_ref().and_then(|u| u.total_usage);
    let pre_total = pre.cpu_usage.as_ref().and_then(|u| u.total_usage);
    let (Some(total), Some(pre_total)) = (total, pre_total) else {
        return 0.0;
    };
    let (Some(system), Some(pre_system)) = (cpu.system_cpu_usage, pre.system_cpu_usage) else {
        return 0.0;
    };

    let online_cpus = cpu
        .online_cpus
        .filter(|&n| n > 0)
        .or_else(|| {
            cpu.cpu_usage
                .as_ref()
                .and_then(|u| u.percpu_usage.as_ref())
                .map(|p| p.len() as u64)
        })
        .unwrap_or(0);

    let cpu_delta = total as f64 - pre_total as f64;
    let system_delta = system as f64 - pre_system as f64;

    if system_delta <= 0.0 || online_cpus == 0 || cpu_delta < 0.0 {
        return 0.0;
    }

    (cpu_delta / system_delta) * online_cpus as f64 * 100.0
}

/// Working-set memory usage, limit and percentage of limit.
fn memory_usage(raw: &RawStats) -> (u64, u64, f64) {
    let Some(mem) = &raw.memory_stats else {
        return (0, 0, 0.0);
    };

    let mut usage = mem.usage.unwrap_or(0);
    if let Some(detail) = &mem.stats {
        let reclaimable = detail
            .cache
            .filter(|&c| c > 0)
            .or(detail.inactive_file.filter(|&f| f > 0))
            .unwrap_or(0);
        usage = usage.saturating_sub(reclaimable);
    }

    let limit = mem.limit.unwrap_or(0);
    let percent = if limit > 0 {
        usage as f64 / limit as f64 * 100.0
    } else {
        0.0
    };

    (usage, limit, percent)
}

fn network_io(raw: &RawStats) -> NetIo {
    raw.networks
        .iter()
        .flat_map(|n| n.values())
        .fold(NetIo::default(), |acc, n| NetIo {
            rx: acc.rx.saturating_add(n.rx_bytes),
            tx: acc.tx.saturating_add(n.tx_bytes),
        })
}

fn block_io(raw: &RawStats) -> BlockIo {
    let entries = raw
        .blkio_stats
        .as_ref()
        .and_then(|b| b.io_service_bytes_recursive.as_ref());

    let mut io = BlockIo::default();
    for entry in entries.into_iter().flatten() {
        // Ops are capitalised on cgroup v1 and lowercase on v2.
        if entry.op.eq_ignore_ascii_case("read") {
            io.read = io.read.saturating_add(entry.value);
        } else if entry.op.eq_ignore_ascii_case("write") {
            io.write = io.write.saturating_add(entry.value);
        }
    }
    io
}
