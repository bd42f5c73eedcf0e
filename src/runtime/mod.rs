//! Container runtime client abstraction.
//!
//! The collector and update checker only ever talk to a runtime through the
//! [`ContainerRuntime`] trait, so tests can substitute a scripted fake. The
//! production implementation is [`DockerRuntime`], backed by bollard.
//!
//! Implementations are not expected to apply timeouts: callers bound every
//! operation themselves.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::stats::RawStats;

mod docker;
#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerRuntime;

/// Errors reported by a container runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("no statistics returned for container {0}")]
    NoStats(String),

    #[error("image {0} has no id")]
    MissingImageId(String),

    #[error("{0}")]
    Other(String),
}

/// A running container as reported by the runtime's list call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    /// Image reference the container was started from (tag or digest).
    pub image: String,
    /// Content digest of the image the container is actually running.
    pub image_id: String,
}

impl ContainerSummary {
    /// Primary container name without the leading slash Docker adds.
    pub fn display_name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .filter(|n| !n.is_empty())
            .unwrap_or("unknown")
    }
}

/// Result of inspecting an image by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Content digest (`sha256:...`) of the local image.
    pub id: String,
}

/// One progress message from an image pull.
#[derive(Debug, Clone, Default)]
pub struct PullEvent {
    pub status: Option<String>,
    pub progress: Option<String>,
    pub layer: Option<String>,
}

/// Progress events from an in-flight pull.
///
/// The channel closing without an error means the pull completed. Dropping the
/// handle aborts the task driving the pull, which in turn drops the underlying
/// request.
pub struct PullHandle {
    events: mpsc::Receiver<Result<PullEvent, RuntimeError>>,
    driver: Option<JoinHandle<()>>,
}

impl PullHandle {
    pub fn new(
        events: mpsc::Receiver<Result<PullEvent, RuntimeError>>,
        driver: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            driver: Some(driver),
        }
    }

    /// Handle whose events are fed by the caller rather than a driver task.
    pub fn from_receiver(events: mpsc::Receiver<Result<PullEvent, RuntimeError>>) -> Self {
        Self {
            events,
            driver: None,
        }
    }

    /// Waits for the next progress event; `None` once the pull has finished.
    pub async fn next_event(&mut self) -> Option<Result<PullEvent, RuntimeError>> {
        self.events.recv().await
    }
}

impl Drop for PullHandle {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Operations the engine needs from a container runtime endpoint.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists containers that are currently running.
    async fn list_running(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Fetches a single, non-streaming statistics snapshot for a container.
    async fn stats(&self, id: &str) -> Result<RawStats, RuntimeError>;

    /// Starts pulling an image and returns its progress stream.
    fn pull(&self, image: &str) -> PullHandle;

    /// Inspects a local image by reference.
    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, RuntimeError>;
}
