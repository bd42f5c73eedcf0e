//! Dashboard endpoints for the container panel.
//!
//! - `GET /api/docker/containers`: running containers with cached stats and
//!   update flags
//! - `GET /api/docker/update-status`: progress of the current/last check
//! - `POST /api/docker/check-updates`: start a forced update check

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dockpanel::{ContainerSummary, StatsSample, UpdateCheckStatus};
use serde::Serialize;
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// A running container as shown on the dashboard.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerView {
    #[serde(flatten)]
    pub container: ContainerSummary,
    pub stats: Option<StatsSample>,
    pub has_update: Option<bool>,
}

/// Handler for GET /api/docker/containers.
#[instrument(skip(state))]
pub async fn containers_handler(State(state): State<SharedState>) -> Response {
    debug!("Processing /api/docker/containers request");
    state.health_stats.record_http_request();

    let limit = state.collector.settings().fetch_timeout;
    let listed = match timeout(limit, state.runtime.list_running()).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("Timed out listing containers after {:?}", limit)),
    };

    match listed {
        Ok(containers) => {
            let data: Vec<ContainerView> = containers
                .into_iter()
                .map(|container| ContainerView {
                    stats: state.collector.get_container_stats(&container.id),
                    has_update: state.checker.has_update(&container.id),
                    container,
                })
                .collect();
            Json(json!({ "success": true, "data": data })).into_response()
        }
        Err(e) => {
            error!("Failed to list containers: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e })),
            )
                .into_response()
        }
    }
}

/// Handler for GET /api/docker/update-status.
#[instrument(skip(state))]
pub async fn update_status_handler(State(state): State<SharedState>) -> Json<UpdateCheckStatus> {
    state.health_stats.record_http_request();
    Json(state.checker.status())
}

/// Handler for POST /api/docker/check-updates.
#[instrument(skip(state))]
pub async fn check_updates_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /api/docker/check-updates request");
    state.health_stats.record_http_request();

    let message = if state.checker.check_for_updates(true) {
        "Update check started"
    } else {
        "Update check already in progress"
    };
    Json(json!({ "success": true, "message": message }))
}
