//! fleetgrid-api - REST API over the fleet controller.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/deployments` | List all deployments |
//! | POST | `/api/v1/deployments` | Submit (or re-submit) a deployment |
//! | GET | `/api/v1/deployments/{id}` | Get deployment details |
//! | DELETE | `/api/v1/deployments/{id}` | Delete and drain a deployment |
//! | POST | `/api/v1/deployments/{id}/reconcile` | Run a reconciliation pass now |
//! | GET | `/api/v1/regions` | List every region |
//! | GET | `/api/v1/regions/{path}` | Get one region (`_` is the root) |
//! | GET | `/api/v1/nodes` | Known-node snapshot |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use fleetgrid_scheduler::FleetController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: FleetController,
}

/// Build the complete API router.
pub fn build_router(controller: FleetController) -> Router {
    let api_state = ApiState { controller };

    let api_routes = Router::new()
        .route("/deployments", get(handlers::list_deployments).post(handlers::create_deployment))
        .route("/deployments/{id}", get(handlers::get_deployment).delete(handlers::delete_deployment))
        .route("/deployments/{id}/reconcile", post(handlers::reconcile_deployment))
        .route("/regions", get(handlers::list_regions))
        .route("/regions/{path}", get(handlers::get_region))
        .route("/nodes", get(handlers::list_nodes))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
