//! Demand-driven container stats collection.
//!
//! The collector runs a polling loop only while consumers are asking for
//! stats. Each read records the access time and wakes the loop if it is idle;
//! the loop stops re-arming itself once no read has happened within the
//! activity window. Reads always return whatever is cached and never wait on
//! a live fetch.

use ahash::AHashSet as HashSet;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cache::StatsCache;
use crate::health_stats::HealthStats;
use crate::runtime::ContainerRuntime;
use crate::stats::StatsSample;

/// Default time between collector iterations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default time a read keeps the collector active.
pub const DEFAULT_ACTIVITY_WINDOW: Duration = Duration::from_secs(30);
/// Default number of concurrent stats fetches.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Timing and concurrency knobs for the collector loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectorSettings {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub activity_window: Duration,
    pub concurrency: usize,
}

impl CollectorSettings {
    /// Settings for a given poll interval; the per-fetch timeout is two and a
    /// half intervals.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            fetch_timeout: interval.mul_f64(2.5),
            activity_window: DEFAULT_ACTIVITY_WINDOW,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self::with_interval(DEFAULT_POLL_INTERVAL)
    }
}

/// Whether the polling loop is currently scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorPhase {
    Idle,
    Running,
}

struct Activity {
    phase: CollectorPhase,
    last_access: Option<Instant>,
}

/// Outcome of a single collector iteration.
#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    pub listed: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub evicted: usize,
    pub list_failed: bool,
    pub duration: Duration,
}

/// Polls stats for running containers into a [`StatsCache`] on demand.
pub struct StatsCollector {
    runtime: Arc<dyn ContainerRuntime>,
    cache: Arc<StatsCache>,
    health: Arc<HealthStats>,
    settings: CollectorSettings,
    activity: Mutex<Activity>,
}

impl StatsCollector {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        cache: Arc<StatsCache>,
        health: Arc<HealthStats>,
        settings: CollectorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            cache,
            health,
            settings,
            activity: Mutex::new(Activity {
                phase: CollectorPhase::Idle,
                last_access: None,
            }),
        })
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<StatsCache> {
        &self.cache
    }

    pub fn phase(&self) -> CollectorPhase {
        self.lock_activity().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == CollectorPhase::Running
    }

    /// Returns the cached sample for `id`, waking the collector as a side
    /// effect. `None` means no sample is known yet.
    pub fn get_container_stats(self: &Arc<Self>, id: &str) -> Option<StatsSample> {
        self.touch();
        self.cache.get(id)
    }

    /// Records consumer demand and starts the polling loop if it is idle.
    pub fn touch(self: &Arc<Self>) {
        let mut activity = self.lock_activity();
        activity.last_access = Some(Instant::now());
        if activity.phase == CollectorPhase::Idle {
            activity.phase = CollectorPhase::Running;
            drop(activity);

            let collector = Arc::clone(self);
            tokio::spawn(async move { collector.run().await });
        }
    }

    async fn run(self: Arc<Self>) {
        info!(
            "Stats collector activated (interval {:?}, {} workers)",
            self.settings.interval, self.settings.concurrency
        );
        let _reset = PanicReset(&self.activity);

        loop {
            self.collect_once().await;
            if !self.rearm() {
                info!(
                    "No stats requests for {:?}, stats collector going idle",
                    self.settings.activity_window
                );
                break;
            }
            sleep(self.settings.interval).await;
        }
    }

    /// Decides whether another iteration is due. Flips the phase to idle under
    /// the same lock `touch` uses, so a concurrent read either keeps this loop
    /// alive or starts a fresh one.
    fn rearm(&self) -> bool {
        let mut activity = self.lock_activity();
        let fresh = activity
            .last_access
            .map_or(false, |t| t.elapsed() < self.settings.activity_window);
        if !fresh {
            activity.phase = CollectorPhase::Idle;
        }
        fresh
    }

    /// Runs one collection pass: list, fetch with a bounded worker pool,
    /// then evict entries for containers that are no longer running.
    #[instrument(skip(self))]
    pub async fn collect_once(self: &Arc<Self>) -> CollectionReport {
        let start = Instant::now();

        let (running, list_failed) = match self.runtime.list_running().await {
            Ok(containers) => (containers, false),
            Err(e) => {
                warn!("Failed to list running containers: {}", e);
                self.health.record_list_failure();
                (Vec::new(), true)
            }
        };

        let running_ids: HashSet<String> = running.iter().map(|c| c.id.clone()).collect();
        let queue: Arc<Mutex<VecDeque<String>>> =
            Arc::new(Mutex::new(running.into_iter().map(|c| c.id).collect()));

        let workers = self.settings.concurrency.max(1).min(running_ids.len());
        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let collector = Arc::clone(self);
            let queue = Arc::clone(&queue);
            pool.spawn(async move { collector.drain(&queue).await });
        }

        let mut refreshed = 0;
        let mut failed = 0;
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok((ok, err)) => {
                    refreshed += ok;
                    failed += err;
                }
                Err(e) => warn!("Stats worker aborted: {}", e),
            }
        }

        let evicted = self.cache.retain_running(&running_ids);
        let duration = start.elapsed();
        self.health
            .record_iteration(running_ids.len() as u64, failed as u64, duration.as_secs_f64());

        debug!(
            "Stats iteration: {} running, {} refreshed, {} failed, {} evicted, {:.2}ms",
            running_ids.len(),
            refreshed,
            failed,
            evicted,
            duration.as_secs_f64() * 1000.0
        );

        CollectionReport {
            listed: running_ids.len(),
            refreshed,
            failed,
            evicted,
            list_failed,
            duration,
        }
    }

    /// Worker body: pops ids until the queue is empty. Returns the number of
    /// refreshed and failed fetches.
    async fn drain(&self, queue: &Mutex<VecDeque<String>>) -> (usize, usize) {
        let mut refreshed = 0;
        let mut failed = 0;

        loop {
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some(id) = next else {
                break;
            };

            // A fetch that loses the race is dropped here, so its result can
            // never reach the cache.
            match timeout(self.settings.fetch_timeout, self.runtime.stats(&id)).await {
                Ok(Ok(raw)) => {
                    let sample = StatsSample::compute(&raw, Utc::now());
                    self.cache.insert(&id, sample);
                    refreshed += 1;
                }
                Ok(Err(e)) => {
                    debug!("Stats fetch for {} failed: {}", short_id(&id), e);
                    failed += 1;
                }
                Err(_) => {
                    debug!(
                        "Stats fetch for {} timed out after {:?}",
                        short_id(&id),
                        self.settings.fetch_timeout
                    );
                    failed += 1;
                }
            }
        }

        (refreshed, failed)
    }

    fn lock_activity(&self) -> std::sync::MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks the collector idle if its loop unwinds, so the next read can start a
/// new one.
struct PanicReset<'a>(&'a Mutex<Activity>);

impl Drop for PanicReset<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).phase = CollectorPhase::Idle;
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::{container, FakeRuntime, StatsBehavior};
    use crate::stats::RawStats;
    use std::sync::atomic::Ordering;

    fn collector(fake: &Arc<FakeRuntime>) -> Arc<StatsCollector> {
        StatsCollector::new(
            fake.clone(),
            Arc::new(StatsCache::new()),
            Arc::new(HealthStats::new()),
            CollectorSettings::default(),
        )
    }

    fn old_sample() -> StatsSample {
        let captured_at = chrono::DateTime::from_timestamp_millis(1_600_000_000_000).unwrap();
        StatsSample::compute(&RawStats::default(), captured_at)
    }

    #[test]
    fn test_fetch_timeout_is_two_and_a_half_intervals() {
        let settings = CollectorSettings::default();
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert_eq!(settings.fetch_timeout, Duration::from_millis(12_500));
        assert_eq!(settings.activity_window, Duration::from_secs(30));
        assert_eq!(settings.concurrency, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_once_refreshes_and_evicts() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![
            container("aaa", "web", "nginx:latest", "sha256:1"),
            container("bbb", "db", "postgres:16", "sha256:2"),
        ]);
        let collector = collector(&fake);
        collector.cache().insert("gone", old_sample());

        let report = collector.collect_once().await;
        assert_eq!(report.listed, 2);
        assert_eq!(report.refreshed, 2);
        assert_eq!(report.evicted, 1);

        let sample = collector.cache().get("aaa").unwrap();
        assert_eq!(sample.cpu_percent, 40.0);
        assert_eq!(sample.mem_percent, 25.0);
        assert!(collector.cache().get("gone").is_none());

        fake.set_running(vec![container("aaa", "web", "nginx:latest", "sha256:1")]);
        let report = collector.collect_once().await;
        assert_eq!(report.evicted, 1);
        assert_eq!(collector.cache().len(), 1);
        assert!(collector.cache().get("bbb").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_overwrites_sample_stamped_in_future() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![container("aaa", "web", "nginx:latest", "sha256:1")]);
        let collector = collector(&fake);
        let future = StatsSample::compute(
            &RawStats::default(),
            Utc::now() + chrono::Duration::hours(1),
        );
        collector.cache().insert("aaa", future);

        let report = collector.collect_once().await;
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(collector.cache().get("aaa").unwrap().cpu_percent, 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_keeps_previous_sample() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![
            container("aaa", "web", "nginx:latest", "sha256:1"),
            container("bbb", "db", "postgres:16", "sha256:2"),
        ]);
        fake.set_stats("aaa", StatsBehavior::Fail);
        let collector = collector(&fake);
        collector.cache().insert("aaa", old_sample());

        let report = collector.collect_once().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.refreshed, 1);
        assert_eq!(collector.cache().get("aaa"), Some(old_sample()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_is_dropped_at_timeout() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![
            container("aaa", "web", "nginx:latest", "sha256:1"),
            container("bbb", "db", "postgres:16", "sha256:2"),
        ]);
        fake.set_stats("aaa", StatsBehavior::Hang);
        let collector = collector(&fake);
        collector.cache().insert("aaa", old_sample());

        let start = Instant::now();
        let report = collector.collect_once().await;

        assert!(start.elapsed() >= Duration::from_millis(12_500));
        assert!(start.elapsed() < Duration::from_secs(13));
        assert_eq!(report.failed, 1);
        assert_eq!(collector.cache().get("aaa"), Some(old_sample()));
        assert!(collector.cache().get("bbb").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_is_bounded() {
        let fake = Arc::new(FakeRuntime::new());
        let containers = (0..12)
            .map(|i| container(&format!("c{i}"), &format!("svc{i}"), "app:latest", "sha256:1"))
            .collect::<Vec<_>>();
        for c in &containers {
            fake.set_stats(&c.id, StatsBehavior::Delay(Duration::from_secs(1)));
        }
        fake.set_running(containers);
        let collector = collector(&fake);

        let report = collector.collect_once().await;
        assert_eq!(report.refreshed, 12);
        assert_eq!(fake.stats_calls.load(Ordering::SeqCst), 12);
        assert_eq!(fake.max_in_flight.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_failure_counts_as_empty_running_set() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_list_failure(true);
        let collector = collector(&fake);
        collector.cache().insert("aaa", old_sample());

        let report = collector.collect_once().await;
        assert!(report.list_failed);
        assert_eq!(report.listed, 0);
        assert!(collector.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_quiesces_and_restarts_on_demand() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![container("aaa", "web", "nginx:latest", "sha256:1")]);
        let collector = collector(&fake);

        // Cold start: nothing cached yet, but the loop is now scheduled.
        assert!(collector.get_container_stats("aaa").is_none());
        assert!(collector.is_running());

        sleep(Duration::from_millis(100)).await;
        assert!(collector.get_container_stats("aaa").is_some());

        // No further reads: the loop stops once the activity window passes.
        sleep(Duration::from_secs(40)).await;
        assert!(!collector.is_running());
        let calls_when_idle = fake.stats_calls.load(Ordering::SeqCst);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.stats_calls.load(Ordering::SeqCst), calls_when_idle);

        // The next read wakes it again and fresh data follows.
        assert!(collector.get_container_stats("aaa").is_some());
        assert!(collector.is_running());
        sleep(Duration::from_millis(100)).await;
        assert!(fake.stats_calls.load(Ordering::SeqCst) > calls_when_idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_start_a_single_loop() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![container("aaa", "web", "nginx:latest", "sha256:1")]);
        let collector = collector(&fake);

        for _ in 0..10 {
            collector.get_container_stats("aaa");
        }
        sleep(Duration::from_millis(100)).await;
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 2);
    }
}
