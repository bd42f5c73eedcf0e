//! Internal running statistics about the engine itself.
//!
//! Each collector iteration is recorded here; the `/health` endpoint renders
//! the current/average/max/min of every tracked value as a plain-text table.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Clone, Copy, Default)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

#[derive(Default)]
struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// Running statistics about collector iterations and HTTP traffic.
pub struct HealthStats {
    containers_polled: Stat,
    fetch_failures: Stat,
    iteration_duration_seconds: Stat,
    total_iterations: AtomicU64,
    list_failures: AtomicU64,
    http_requests: AtomicU64,
    started: Instant,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            containers_polled: Stat::default(),
            fetch_failures: Stat::default(),
            iteration_duration_seconds: Stat::default(),
            total_iterations: AtomicU64::new(0),
            list_failures: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records one finished collector iteration.
    pub fn record_iteration(&self, polled: u64, failed: u64, duration_seconds: f64) {
        self.containers_polled.add_sample(polled as f64);
        self.fetch_failures.add_sample(failed as f64);
        self.iteration_duration_seconds.add_sample(duration_seconds);
        self.total_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_list_failure(&self) {
        self.list_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_iterations(&self) -> u64 {
        self.total_iterations.load(Ordering::Relaxed)
    }

    pub fn list_failures(&self) -> u64 {
        self.list_failures.load(Ordering::Relaxed)
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn render_table(&self) -> String {
        let (cp_cur, cp_avg, cp_max, cp_min, _) = self.containers_polled.snapshot();
        let (ff_cur, ff_avg, ff_max, ff_min, _) = self.fetch_failures.snapshot();
        let (id_cur, id_avg, id_max, id_min, _) = self.iteration_duration_seconds.snapshot();

        let left_col = 26usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

        let rows = [
            ("containers polled", cp_cur, cp_avg, cp_max, cp_min, 0usize),
            ("stats fetch failures", ff_cur, ff_avg, ff_max, ff_min, 0),
            ("iteration duration (s)", id_cur, id_avg, id_max, id_min, 3),
        ];
        for (label, cur, avg, max, min, precision) in rows {
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                label,
                format!("{:.p$}", cur, p = precision),
                format!("{:.p$}", avg, p = precision.max(1)),
                format!("{:.p$}", max, p = precision),
                format!("{:.p$}", min, p = precision),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(out, "number of collector iterations: {}", self.total_iterations()).ok();
        writeln!(out, "container list failures: {}", self.list_failures()).ok();
        writeln!(
            out,
            "http requests served: {}",
            self.http_requests.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(out, "uptime (s): {}", self.get_uptime_seconds()).ok();

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stat_tracks_extremes() {
        let mut s = RunningStat::default();
        s.add(3.0);
        s.add(1.0);
        s.add(5.0);
        assert_eq!(s.count, 3);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 5.0);
        assert_eq!(s.last, 5.0);
        assert!((s.avg() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_render_table_after_iterations() {
        let stats = HealthStats::new();
        stats.record_iteration(4, 1, 0.25);
        stats.record_iteration(6, 0, 0.75);
        stats.record_list_failure();

        assert_eq!(stats.total_iterations(), 2);
        let table = stats.render_table();
        assert!(table.contains("containers polled"));
        assert!(table.contains("number of collector iterations: 2"));
        assert!(table.contains("container list failures: 1"));
        assert!(table.contains("0.500"));
    }
}
