//! REST API handlers.
//!
//! Each handler goes through the `FleetController` and returns JSON
//! responses wrapped in a `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use fleetgrid_core::{DeploymentId, DeploymentRequest};
use fleetgrid_region::{RegionId, RegionView};
use fleetgrid_scheduler::{DeploymentState, SchedulerError};

use crate::ApiState;

/// Path segment standing for the root region.
pub const ROOT_REGION_SEGMENT: &str = "_";

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn scheduler_error(e: &SchedulerError) -> axum::response::Response {
    let status = match e {
        SchedulerError::InvalidPath { .. } | SchedulerError::RegionNotFound(_) => StatusCode::BAD_REQUEST,
        SchedulerError::DeploymentNotFound(_) => StatusCode::NOT_FOUND,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Deployments ────────────────────────────────────────────────

/// Body returned by a successful submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub deployment_id: DeploymentId,
    pub state: DeploymentState,
    pub instances: usize,
}

/// GET /api/v1/deployments
pub async fn list_deployments(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.list_deployments().await)
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.get_deployment(&id).await {
        Some(deployment) => ApiResponse::ok(deployment).into_response(),
        None => error_response("deployment not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// POST /api/v1/deployments
pub async fn create_deployment(
    State(state): State<ApiState>,
    Json(request): Json<DeploymentRequest>,
) -> impl IntoResponse {
    let id = match state.controller.submit_deployment(request).await {
        Ok(id) => id,
        Err(e) => return scheduler_error(&e),
    };

    let (deployment_state, instances) = match state.controller.get_deployment(&id).await {
        Some(d) => (d.state, d.instances.len()),
        None => (DeploymentState::Pending, 0),
    };
    (
        StatusCode::CREATED,
        ApiResponse::ok(SubmitResponse {
            deployment_id: id,
            state: deployment_state,
            instances,
        }),
    )
        .into_response()
}

/// DELETE /api/v1/deployments/{id}
pub async fn delete_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.delete_deployment(&id).await {
        Ok(deployment) => ApiResponse::ok(deployment).into_response(),
        Err(e) => scheduler_error(&e),
    }
}

/// POST /api/v1/deployments/{id}/reconcile
pub async fn reconcile_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.trigger_reconciliation(&id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => scheduler_error(&e),
    }
}

// ── Regions ────────────────────────────────────────────────────

/// GET /api/v1/regions
pub async fn list_regions(State(state): State<ApiState>) -> impl IntoResponse {
    let regions = state.controller.regions();
    let views: Vec<RegionView> = regions
        .subtree(RegionId::ROOT)
        .into_iter()
        .filter_map(|id| regions.view(id))
        .collect();
    ApiResponse::ok(views)
}

/// GET /api/v1/regions/{path}
pub async fn get_region(
    State(state): State<ApiState>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    let path = if path == ROOT_REGION_SEGMENT { "" } else { path.as_str() };
    let regions = state.controller.regions();

    match regions.resolve(path) {
        Ok(Some(id)) => match regions.view(id) {
            Some(view) => ApiResponse::ok(view).into_response(),
            None => error_response("region not found", StatusCode::NOT_FOUND).into_response(),
        },
        Ok(None) => error_response("region not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    }
}

// ── Nodes ──────────────────────────────────────────────────────

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.registry().list_known_nodes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fleetgrid_core::{ContainerSpec, FleetConfig, NodeRef};
    use fleetgrid_scheduler::{FleetController, SimulatedEngine, StaticNodeRegistry};

    fn test_state() -> ApiState {
        let config = FleetConfig::from_toml_str(
            r#"
[[regions]]
path = "eu.west"
properties = { tier = "gold" }
"#,
        )
        .unwrap();
        let registry = Arc::new(StaticNodeRegistry::from_nodes([
            NodeRef::new("a").in_region("eu.west"),
            NodeRef::new("b").in_region("eu.west"),
        ]));
        let controller =
            FleetController::from_config(&config, registry, Arc::new(SimulatedEngine::new())).unwrap();
        ApiState { controller }
    }

    fn request(id: &str, region: &str, scale: u32) -> DeploymentRequest {
        DeploymentRequest::new(ContainerSpec::new("nginx"), region, scale).with_id(id)
    }

    #[tokio::test]
    async fn list_deployments_empty() {
        let state = test_state();
        let resp = list_deployments(State(state)).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_and_get_deployment() {
        let state = test_state();

        let resp = create_deployment(State(state.clone()), Json(request("web", "eu", 2))).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = get_deployment(State(state), Path("web".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_rejects_malformed_region() {
        let state = test_state();
        let resp = create_deployment(State(state), Json(request("web", "eu.", 1))).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_rejects_strict_missing_region() {
        let state = test_state();
        let resp = create_deployment(State(state), Json(request("web", "us", 1).strict())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_nonexistent_deployment() {
        let state = test_state();
        let resp = get_deployment(State(state), Path("nope".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_deployment_exists() {
        let state = test_state();
        state.controller.submit_deployment(request("web", "eu", 1)).await.unwrap();

        let resp = delete_deployment(State(state.clone()), Path("web".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.controller.get_deployment("web").await.is_none());
    }

    #[tokio::test]
    async fn delete_nonexistent_deployment() {
        let state = test_state();
        let resp = delete_deployment(State(state), Path("nope".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reconcile_known_and_unknown() {
        let state = test_state();
        state.controller.submit_deployment(request("web", "eu", 1)).await.unwrap();

        let resp = reconcile_deployment(State(state.clone()), Path("web".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let resp = reconcile_deployment(State(state), Path("nope".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_region_by_path() {
        let state = test_state();
        let resp = get_region(State(state.clone()), Path("eu.west".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let resp = get_region(State(state.clone()), Path("_".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let resp = get_region(State(state.clone()), Path("us".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);

        let resp = get_region(State(state), Path("eu..west".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_regions_and_nodes() {
        let state = test_state();
        let resp = list_regions(State(state.clone())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let resp = list_nodes(State(state)).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }
}
