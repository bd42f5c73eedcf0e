//! Docker Engine API implementation of [`ContainerRuntime`].

use async_trait::async_trait;
use bollard::container::{ListContainersOptions, StatsOptions};
use bollard::image::CreateImageOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::{ContainerRuntime, ContainerSummary, ImageInfo, PullEvent, PullHandle, RuntimeError};
use crate::stats::RawStats;

/// Client request timeout in seconds (bollard's own default).
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Number of pull progress events buffered ahead of the supervisor.
const PULL_EVENT_BUFFER: usize = 64;

/// Container runtime backed by a local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the daemon at `socket`, or to the platform default
    /// (honouring `DOCKER_HOST`) when no socket is given.
    pub fn connect(socket: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match socket {
            Some(path) => {
                info!("Connecting to Docker daemon at {}", path);
                Docker::connect_with_socket(path, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
            None => {
                info!("Connecting to Docker daemon with local defaults");
                Docker::connect_with_local_defaults()?
            }
        };
        Ok(Self { docker })
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<String, RuntimeError> {
        Ok(self.docker.ping().await?)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .filter(|c| c.state.as_deref().map_or(true, |s| s == "running"))
            .filter_map(|c| {
                Some(ContainerSummary {
                    id: c.id?,
                    names: c.names.unwrap_or_default(),
                    image: c.image.unwrap_or_default(),
                    image_id: c.image_id.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn stats(&self, id: &str) -> Result<RawStats, RuntimeError> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = Box::pin(self.docker.stats(id, Some(options)));

        match stream.next().await {
            Some(result) => {
                let stats = result?;
                // Re-read through the engine's JSON shape so the metric code
                // only depends on the fields it uses.
                let raw = serde_json::to_value(&stats)
                    .ok()
                    .map(RawStats::from_json)
                    .unwrap_or_default();
                Ok(raw)
            }
            None => Err(RuntimeError::NoStats(id.to_string())),
        }
    }

    fn pull(&self, image: &str) -> PullHandle {
        let (tx, rx) = mpsc::channel(PULL_EVENT_BUFFER);
        let docker = self.docker.clone();
        let image = image.to_string();

        let driver = tokio::spawn(async move {
            debug!("Pulling image {}", image);
            let options = CreateImageOptions {
                from_image: image.clone(),
                ..Default::default()
            };
            let mut stream = Box::pin(docker.create_image(Some(options), None, None));

            while let Some(item) = stream.next().await {
                let event = item
                    .map(|info| PullEvent {
                        status: info.status,
                        progress: info.progress,
                        layer: info.id,
                    })
                    .map_err(RuntimeError::from);
                let failed = event.is_err();

                if let Ok(ev) = &event {
                    trace!("Pull {}: {:?} {:?}", image, ev.status, ev.progress);
                }
                if tx.send(event).await.is_err() || failed {
                    break;
                }
            }
        });

        PullHandle::new(rx, driver)
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, RuntimeError> {
        let inspect = self.docker.inspect_image(image).await?;
        image_info(image, inspect.id)
    }
}

/// An image without an id cannot be compared with a container's image, so it
/// is an error rather than an empty digest.
fn image_info(image: &str, id: Option<String>) -> Result<ImageInfo, RuntimeError> {
    match id {
        Some(id) if !id.is_empty() => Ok(ImageInfo { id }),
        _ => Err(RuntimeError::MissingImageId(image.to_string())),
    }
}
