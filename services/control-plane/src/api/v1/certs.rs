//! Server certificate endpoints.
//!
//! Certificates uploaded here are referenced by name from `https`
//! exposures.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use berth_sslcert::{CertManager, CertMetadata};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

/// Create certificate routes.
///
/// Mounted at /v1/certs
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_cert))
        .route("/{name}", get(get_cert).delete(delete_cert))
}

/// Request to upload a certificate.
#[derive(Debug, Deserialize)]
pub struct CreateCertRequest {
    pub name: String,
    /// PEM certificate, optionally followed by its chain.
    pub cert: String,
    /// PEM private key.
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCertResponse {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CertResponse {
    pub name: String,
    pub arn: String,
}

/// POST /v1/certs
async fn create_cert(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateCertRequest>,
) -> Result<(StatusCode, Json<CreateCertResponse>), ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request("invalid_name", "certificate name is required")
            .with_request_id(ctx.request_id));
    }

    let id = state
        .certs()
        .add(&req.name, &req.cert, &req.key)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    info!(request_id = %ctx.request_id, name = %req.name, id = %id, "Certificate uploaded");
    Ok((StatusCode::CREATED, Json(CreateCertResponse { id })))
}

/// GET /v1/certs/{name}
async fn get_cert(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
) -> Result<Json<CertResponse>, ApiError> {
    let CertMetadata { arn } = state
        .certs()
        .metadata(&name)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    Ok(Json(CertResponse { name, arn }))
}

/// DELETE /v1/certs/{name}
async fn delete_cert(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .certs()
        .remove(&name)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    info!(request_id = %ctx.request_id, name = %name, "Certificate deleted");
    Ok(StatusCode::NO_CONTENT)
}
