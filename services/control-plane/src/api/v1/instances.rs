//! Instance endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use berth_scheduler::{Instance, Scheduler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

/// Routes listing an app's instances.
///
/// Mounted at /v1/apps/{app_id}/instances
pub fn app_routes() -> Router<AppState> {
    Router::new().route("/", get(list_instances))
}

/// Routes addressing a single instance.
///
/// Mounted at /v1/instances
pub fn routes() -> Router<AppState> {
    Router::new().route("/{instance_id}", delete(stop_instance))
}

/// A running instance as reported by the scheduler.
#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceResponse {
    pub id: String,
    pub process_type: String,
    pub state: String,
    pub updated_at: DateTime<Utc>,
}

impl From<Instance> for InstanceResponse {
    fn from(instance: Instance) -> Self {
        Self {
            id: instance.id,
            process_type: instance.process.process_type.clone(),
            state: instance.state,
            updated_at: instance.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListInstancesResponse {
    pub items: Vec<InstanceResponse>,
}

/// List an app's running instances.
///
/// GET /v1/apps/{app_id}/instances
async fn list_instances(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(app_id): Path<String>,
) -> Result<Json<ListInstancesResponse>, ApiError> {
    let instances = state
        .scheduler()
        .instances(&ctx.operation(), &app_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    let mut items: Vec<InstanceResponse> = instances.into_iter().map(Into::into).collect();
    items.sort_by(|a, b| a.process_type.cmp(&b.process_type).then(a.id.cmp(&b.id)));
    Ok(Json(ListInstancesResponse { items }))
}

/// Stop an instance. The scheduler replaces it to keep the desired count.
///
/// DELETE /v1/instances/{instance_id}
async fn stop_instance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(instance_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .scheduler()
        .stop(&ctx.operation(), &instance_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    info!(request_id = %ctx.request_id, instance_id = %instance_id, "Instance stopped");
    Ok(StatusCode::ACCEPTED)
}
