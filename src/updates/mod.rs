//! Image update checks for running containers.
//!
//! A check pulls the tag each running container was started from and compares
//! the resulting image digest with the one the container runs. Checks are
//! single-flight and rate limited, pulls run one at a time, and each pull is
//! bounded by an idle and a total timeout. Progress and per-container failures
//! are published through [`UpdateCheckStatus`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::UpdateCache;
use crate::runtime::{ContainerRuntime, ContainerSummary, RuntimeError};

mod pull;

pub use pull::supervise_pull;

/// Minimum time between two non-forced checks.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// A pull with no progress for this long is abandoned.
pub const DEFAULT_PULL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Hard ceiling for a single pull.
pub const DEFAULT_PULL_TOTAL_TIMEOUT: Duration = Duration::from_secs(600);

/// Why checking a single container failed.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("idle timeout pulling image (no progress for {0:?})")]
    IdleTimeout(Duration),

    #[error("total timeout pulling image (exceeded {0:?})")]
    TotalTimeout(Duration),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateSettings {
    pub min_interval: Duration,
    pub pull_idle_timeout: Duration,
    pub pull_total_timeout: Duration,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            pull_idle_timeout: DEFAULT_PULL_IDLE_TIMEOUT,
            pull_total_timeout: DEFAULT_PULL_TOTAL_TIMEOUT,
        }
    }
}

/// A container whose check failed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateFailure {
    pub name: String,
    pub error: String,
}

/// Progress and outcome of the most recent update check.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckStatus {
    #[serde(rename = "lastCheck", with = "chrono::serde::ts_milliseconds_option")]
    pub last_check_at: Option<DateTime<Utc>>,
    pub is_checking: bool,
    pub last_error: Option<String>,
    pub checked_count: usize,
    pub total_count: usize,
    pub update_count: usize,
    pub failures: Vec<UpdateFailure>,
}

struct CheckState {
    status: UpdateCheckStatus,
    /// Monotonic twin of `status.last_check_at`, used for rate limiting.
    last_check: Option<Instant>,
    in_flight: bool,
}

/// Checks running containers for newer images.
pub struct UpdateChecker {
    runtime: Arc<dyn ContainerRuntime>,
    updates: Arc<UpdateCache>,
    settings: UpdateSettings,
    state: Mutex<CheckState>,
}

/// Held for the duration of one check; releases the single-flight slot on
/// every exit path.
struct CheckGuard {
    checker: Arc<UpdateChecker>,
}

impl Drop for CheckGuard {
    fn drop(&mut self) {
        let mut state = self.checker.lock_state();
        state.in_flight = false;
        state.status.is_checking = false;
    }
}

impl UpdateChecker {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        updates: Arc<UpdateCache>,
        settings: UpdateSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            updates,
            settings,
            state: Mutex::new(CheckState {
                status: UpdateCheckStatus::default(),
                last_check: None,
                in_flight: false,
            }),
        })
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    /// Point-in-time copy of the current status.
    pub fn status(&self) -> UpdateCheckStatus {
        self.lock_state().status.clone()
    }

    /// `Some(true)` if a newer image is known to exist for the container,
    /// `None` if it has not been checked successfully yet.
    pub fn has_update(&self, id: &str) -> Option<bool> {
        self.updates.get(id)
    }

    pub fn updates(&self) -> &Arc<UpdateCache> {
        &self.updates
    }

    /// Starts a check in the background. Returns `false` if the call was a
    /// no-op because a check is running or, without `force`, the last check
    /// finished less than the minimum interval ago.
    pub fn check_for_updates(self: &Arc<Self>, force: bool) -> bool {
        let Some(guard) = self.try_begin(force) else {
            return false;
        };
        tokio::spawn(Self::run(guard));
        true
    }

    /// Same as [`check_for_updates`](Self::check_for_updates) but waits for
    /// the check to finish.
    pub async fn check_now(self: &Arc<Self>, force: bool) -> bool {
        let Some(guard) = self.try_begin(force) else {
            return false;
        };
        Self::run(guard).await;
        true
    }

    /// Triggers a non-forced check every `every`, starting immediately.
    pub fn spawn_periodic(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let checker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            debug!("Periodic update checks every {}s", every.as_secs());
            loop {
                ticker.tick().await;
                if checker.check_for_updates(false) {
                    debug!("Scheduled update check started");
                }
            }
        })
    }

    fn try_begin(self: &Arc<Self>, force: bool) -> Option<CheckGuard> {
        let mut state = self.lock_state();

        if state.in_flight {
            debug!("Update check already in progress, ignoring request");
            return None;
        }
        if !force {
            if let Some(last) = state.last_check {
                if last.elapsed() < self.settings.min_interval {
                    debug!(
                        "Last update check {}s ago, skipping",
                        last.elapsed().as_secs()
                    );
                    return None;
                }
            }
        }

        state.in_flight = true;
        let status = &mut state.status;
        status.is_checking = true;
        status.last_error = None;
        status.checked_count = 0;
        status.update_count = 0;
        status.failures.clear();

        Some(CheckGuard {
            checker: Arc::clone(self),
        })
    }

    async fn run(guard: CheckGuard) {
        let checker = &guard.checker;
        let start = Instant::now();
        info!("Starting container update check");

        let containers = match checker.runtime.list_running().await {
            Ok(containers) => containers,
            Err(e) => {
                error!("Update check could not list containers: {}", e);
                checker.lock_state().status.last_error = Some(e.to_string());
                return;
            }
        };

        let targets: Vec<ContainerSummary> = containers
            .into_iter()
            .filter(|c| is_mutable_tag(&c.image))
            .collect();
        checker.lock_state().status.total_count = targets.len();

        for target in &targets {
            let outcome = checker.check_target(target).await;

            let mut state = checker.lock_state();
            match outcome {
                Ok(has_update) => {
                    checker.updates.set(&target.id, has_update);
                    if has_update {
                        state.status.update_count += 1;
                        info!(
                            "Newer image available for {} ({})",
                            target.display_name(),
                            target.image
                        );
                    }
                }
                Err(e) => {
                    warn!("Update check for {} failed: {}", target.display_name(), e);
                    state.status.failures.push(UpdateFailure {
                        name: target.display_name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
            state.status.checked_count += 1;
        }

        let mut state = checker.lock_state();
        state.status.last_check_at = Some(Utc::now());
        state.last_check = Some(Instant::now());
        info!(
            "Update check completed: {} checked, {} updates, {} failures, {:.1}s",
            state.status.checked_count,
            state.status.update_count,
            state.status.failures.len(),
            start.elapsed().as_secs_f64()
        );
    }

    /// Pulls the container's image tag and reports whether the pulled digest
    /// differs from the one the container runs.
    async fn check_target(&self, target: &ContainerSummary) -> Result<bool, UpdateError> {
        debug!(
            "Pulling {} for container {}",
            target.image,
            target.display_name()
        );
        let pull = self.runtime.pull(&target.image);
        let events = supervise_pull(
            pull,
            self.settings.pull_idle_timeout,
            self.settings.pull_total_timeout,
        )
        .await?;
        debug!("Pull of {} finished after {} events", target.image, events);

        let image = self.runtime.inspect_image(&target.image).await?;
        Ok(image.id != target.image_id)
    }

    fn lock_state(&self) -> MutexGuard<'_, CheckState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether `image` names a tag that can move, as opposed to a content digest.
pub fn is_mutable_tag(image: &str) -> bool {
    !image.is_empty() && !image.starts_with("sha256:") && !image.contains("@sha256:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::{container, FakeRuntime, PullScript};
    use std::sync::atomic::Ordering;
    use tokio::time::sleep;

    fn checker(fake: &Arc<FakeRuntime>) -> Arc<UpdateChecker> {
        UpdateChecker::new(
            fake.clone(),
            Arc::new(UpdateCache::new()),
            UpdateSettings::default(),
        )
    }

    #[test]
    fn test_is_mutable_tag() {
        assert!(is_mutable_tag("nginx:latest"));
        assert!(is_mutable_tag("ghcr.io/acme/app"));
        assert!(!is_mutable_tag("sha256:0123abcd"));
        assert!(!is_mutable_tag("nginx@sha256:0123abcd"));
        assert!(!is_mutable_tag(""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detects_newer_image() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![
            container("aaa", "web", "nginx:latest", "sha256:old"),
            container("bbb", "cache", "redis:7", "sha256:same"),
            container("ccc", "pinned", "sha256:deadbeef", "sha256:deadbeef"),
            container("ddd", "digest", "app@sha256:abc", "sha256:abc"),
        ]);
        fake.set_image("nginx:latest", "sha256:new");
        fake.set_image("redis:7", "sha256:same");
        let checker = checker(&fake);

        assert!(checker.check_now(true).await);

        let status = checker.status();
        assert!(!status.is_checking);
        assert_eq!(status.total_count, 2);
        assert_eq!(status.checked_count, 2);
        assert_eq!(status.update_count, 1);
        assert!(status.failures.is_empty());
        assert!(status.last_check_at.is_some());
        assert_eq!(status.last_error, None);

        assert_eq!(checker.has_update("aaa"), Some(true));
        assert_eq!(checker.has_update("bbb"), Some(false));
        assert_eq!(checker.has_update("ccc"), None);
        assert_eq!(fake.pull_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated_and_recorded() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![
            container("aaa", "private", "registry.local/app:1", "sha256:1"),
            container("bbb", "web", "nginx:latest", "sha256:old"),
            container("ccc", "gone", "vanished:latest", "sha256:2"),
        ]);
        fake.set_pull(
            "registry.local/app:1",
            PullScript::Fail("pull access denied".into()),
        );
        fake.set_image("nginx:latest", "sha256:new");
        let checker = checker(&fake);

        checker.check_now(true).await;

        let status = checker.status();
        assert_eq!(status.total_count, 3);
        assert_eq!(status.checked_count, 3);
        assert_eq!(status.update_count, 1);
        assert_eq!(
            status.failures,
            vec![
                UpdateFailure {
                    name: "private".into(),
                    error: "pull access denied".into(),
                },
                UpdateFailure {
                    name: "gone".into(),
                    error: "No such image: vanished:latest".into(),
                },
            ]
        );
        assert_eq!(checker.has_update("aaa"), None);
        assert_eq!(checker.has_update("bbb"), Some(true));
        assert_eq!(checker.has_update("ccc"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_checks_run_once() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![container("aaa", "web", "nginx:latest", "sha256:old")]);
        fake.set_pull("nginx:latest", PullScript::Complete { events: 5 });
        fake.set_image("nginx:latest", "sha256:old");
        let checker = checker(&fake);

        assert!(checker.check_for_updates(true));
        assert!(!checker.check_for_updates(true));
        assert!(checker.status().is_checking);

        sleep(Duration::from_secs(10)).await;

        let status = checker.status();
        assert!(!status.is_checking);
        assert_eq!(status.checked_count, 1);
        assert_eq!(fake.pull_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unforced_check_is_rate_limited() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![container("aaa", "web", "nginx:latest", "sha256:old")]);
        fake.set_image("nginx:latest", "sha256:old");
        let checker = checker(&fake);

        assert!(checker.check_now(true).await);
        let after_first = checker.status();

        sleep(Duration::from_secs(1)).await;
        assert!(!checker.check_for_updates(false));
        assert_eq!(checker.status(), after_first);
        assert_eq!(fake.pull_calls.load(Ordering::SeqCst), 1);

        sleep(DEFAULT_MIN_INTERVAL).await;
        assert!(checker.check_now(false).await);
        assert_eq!(fake.pull_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endless_pull_fails_with_total_timeout() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![container("aaa", "web", "nginx:latest", "sha256:old")]);
        fake.set_pull("nginx:latest", PullScript::Trickle(Duration::from_secs(10)));
        let checker = checker(&fake);

        let start = Instant::now();
        checker.check_now(true).await;
        assert!(start.elapsed() >= DEFAULT_PULL_TOTAL_TIMEOUT);

        let status = checker.status();
        assert_eq!(status.checked_count, 1);
        assert_eq!(status.failures.len(), 1);
        assert!(status.failures[0].error.contains("total timeout"));
        assert!(!status.failures[0].error.contains("idle timeout"));
        assert_eq!(checker.has_update("aaa"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_pull_fails_with_idle_timeout() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_running(vec![container("aaa", "web", "nginx:latest", "sha256:old")]);
        fake.set_pull("nginx:latest", PullScript::Stall);
        let checker = checker(&fake);

        let start = Instant::now();
        checker.check_now(true).await;
        assert!(start.elapsed() < DEFAULT_PULL_TOTAL_TIMEOUT);

        let status = checker.status();
        assert_eq!(status.failures.len(), 1);
        assert!(status.failures[0].error.contains("idle timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_failure_sets_last_error() {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_list_failure(true);
        let checker = checker(&fake);

        assert!(checker.check_now(false).await);
        let status = checker.status();
        assert!(!status.is_checking);
        assert_eq!(status.last_error.as_deref(), Some("daemon unreachable"));
        assert_eq!(status.last_check_at, None);

        // A failed run does not count towards the rate limit.
        fake.set_list_failure(false);
        assert!(checker.check_now(false).await);
        assert_eq!(checker.status().last_error, None);
    }

    #[test]
    fn test_status_serializes_for_dashboard() {
        let status = UpdateCheckStatus {
            last_check_at: DateTime::from_timestamp_millis(1_700_000_000_000),
            failures: vec![UpdateFailure {
                name: "web".into(),
                error: "idle timeout".into(),
            }],
            ..Default::default()
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["lastCheck"], 1_700_000_000_000i64);
        assert_eq!(v["isChecking"], false);
        assert_eq!(v["checkedCount"], 0);
        assert_eq!(v["failures"][0]["name"], "web");
        assert!(v["lastError"].is_null());
    }
}
