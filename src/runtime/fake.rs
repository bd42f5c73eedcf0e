//! Scripted in-memory runtime used by the engine tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::{ContainerRuntime, ContainerSummary, ImageInfo, PullEvent, PullHandle, RuntimeError};
use crate::stats::RawStats;

#[derive(Clone)]
pub(crate) enum StatsBehavior {
    Delay(Duration),
    Hang,
    Fail,
}

#[derive(Clone)]
pub(crate) enum PullScript {
    /// Emits `events` progress events one second apart, then completes.
    Complete { events: usize },
    /// Fails immediately with the given message.
    Fail(String),
    /// Keeps the stream open without ever emitting anything.
    Stall,
    /// Emits an event every interval and never completes.
    Trickle(Duration),
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    containers: Mutex<Vec<ContainerSummary>>,
    fail_list: AtomicBool,
    stats: Mutex<HashMap<String, StatsBehavior>>,
    pulls: Mutex<HashMap<String, PullScript>>,
    images: Mutex<HashMap<String, String>>,
    pub list_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    pub pull_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn container(id: &str, name: &str, image: &str, image_id: &str) -> ContainerSummary {
    ContainerSummary {
        id: id.to_string(),
        names: vec![format!("/{name}")],
        image: image.to_string(),
        image_id: image_id.to_string(),
    }
}

pub(crate) fn raw_fixture() -> RawStats {
    RawStats::from_json(serde_json::json!({
        "cpu_stats": {
            "cpu_usage": { "total_usage": 300 },
            "system_cpu_usage": 2000,
            "online_cpus": 2
        },
        "precpu_stats": {
            "cpu_usage": { "total_usage": 100 },
            "system_cpu_usage": 1000
        },
        "memory_stats": { "usage": 2048, "limit": 8192 }
    }))
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, containers: Vec<ContainerSummary>) {
        *self.containers.lock().unwrap() = containers;
    }

    pub fn set_list_failure(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_stats(&self, id: &str, behavior: StatsBehavior) {
        self.stats.lock().unwrap().insert(id.to_string(), behavior);
    }

    pub fn set_pull(&self, image: &str, script: PullScript) {
        self.pulls.lock().unwrap().insert(image.to_string(), script);
    }

    pub fn set_image(&self, image: &str, id: &str) {
        self.images
            .lock()
            .unwrap()
            .insert(image.to_string(), id.to_string());
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_running(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RuntimeError::Other("daemon unreachable".into()));
        }
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn stats(&self, id: &str) -> Result<RawStats, RuntimeError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.stats.lock().unwrap().get(id).cloned();

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match behavior {
            None => Ok(raw_fixture()),
            Some(StatsBehavior::Delay(d)) => {
                sleep(d).await;
                Ok(raw_fixture())
            }
            Some(StatsBehavior::Hang) => std::future::pending().await,
            Some(StatsBehavior::Fail) => Err(RuntimeError::Other(format!("no such container {id}"))),
        }
    }

    fn pull(&self, image: &str) -> PullHandle {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .pulls
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .unwrap_or(PullScript::Complete { events: 3 });

        let (tx, rx) = mpsc::channel(8);
        let driver = tokio::spawn(async move {
            let progress = |n: usize| PullEvent {
                status: Some("Downloading".into()),
                progress: Some(format!("{n}")),
                layer: Some("layer0".into()),
            };
            match script {
                PullScript::Complete { events } => {
                    for n in 0..events {
                        if tx.send(Ok(progress(n))).await.is_err() {
                            return;
                        }
                        sleep(Duration::from_secs(1)).await;
                    }
                }
                PullScript::Fail(msg) => {
                    let _ = tx.send(Err(RuntimeError::Other(msg))).await;
                }
                PullScript::Stall => {
                    let _tx = tx;
                    std::future::pending::<()>().await;
                }
                PullScript::Trickle(every) => {
                    let mut n = 0;
                    loop {
                        if tx.send(Ok(progress(n))).await.is_err() {
                            return;
                        }
                        n += 1;
                        sleep(every).await;
                    }
                }
            }
        });

        PullHandle::new(rx, driver)
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, RuntimeError> {
        self.images
            .lock()
            .unwrap()
            .get(image)
            .map(|id| ImageInfo { id: id.clone() })
            .ok_or_else(|| RuntimeError::Other(format!("No such image: {image}")))
    }
}
