//! App endpoints.
//!
//! Apps are not stored by the control plane. Every request that needs one
//! carries the full manifest, which is converted into a fresh
//! [`berth_scheduler::App`] for the scheduler call.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use berth_scheduler::{App, Exposure, Image, Process, Runner, Scheduler, SchedulerError};
use serde::Deserialize;
use tracing::info;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

/// Create app routes.
///
/// Mounted at /v1/apps
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{app_id}", delete(remove_app))
        .route("/{app_id}/run", post(run_process))
}

// =============================================================================
// Request Types
// =============================================================================

/// Desired state of one release of an app.
#[derive(Debug, Clone, Deserialize)]
pub struct AppManifest {
    pub name: String,
    pub release: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub processes: Vec<ProcessManifest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessManifest {
    #[serde(rename = "type")]
    pub process_type: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub exposure: Option<ExposureManifest>,
    #[serde(default = "default_instances")]
    pub instances: u32,
    #[serde(default)]
    pub memory_limit: u64,
    #[serde(default)]
    pub cpu_shares: u32,
    #[serde(default)]
    pub nproc: u32,
}

fn default_instances() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExposureManifest {
    #[serde(default)]
    pub external: bool,
    pub protocol: String,
    /// Certificate name; required for `https`.
    #[serde(default)]
    pub cert: Option<String>,
}

impl AppManifest {
    /// Build the scheduler view of this manifest for `app_id`.
    pub fn into_app(self, app_id: &str) -> Result<App, ApiError> {
        let mut app = App::new(app_id, self.name, self.release);
        app.env = self.env;
        app.labels = self.labels;
        for process in self.processes {
            app.processes.push(process.into_process()?);
        }
        Ok(app)
    }
}

impl ProcessManifest {
    fn into_process(self) -> Result<Process, ApiError> {
        let image: Image = self.image.parse().map_err(|e| {
            ApiError::bad_request(
                "invalid_image",
                format!("process {}: {e}", self.process_type),
            )
        })?;

        let mut process = Process::new(self.process_type, image)
            .with_command(self.command)
            .with_instances(self.instances);
        process.env = self.env;
        process.labels = self.labels;
        process.memory_limit = self.memory_limit;
        process.cpu_shares = self.cpu_shares;
        process.nproc = self.nproc;

        if let Some(exposure) = self.exposure {
            process.exposure = Some(exposure.into_exposure(&process.process_type)?);
        }
        Ok(process)
    }
}

impl ExposureManifest {
    fn into_exposure(self, process_type: &str) -> Result<Exposure, ApiError> {
        match self.protocol.as_str() {
            "http" => Ok(Exposure::http(self.external)),
            "https" => match self.cert {
                Some(cert) if !cert.is_empty() => Ok(Exposure::https(self.external, cert)),
                _ => Err(ApiError::bad_request(
                    "invalid_exposure",
                    format!("process {process_type}: https exposure requires a cert"),
                )),
            },
            other => Err(ApiError::bad_request(
                "unsupported_exposure",
                format!("process {process_type}: unsupported protocol {other}"),
            )),
        }
    }
}

/// Request to run a one-off process.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub app: AppManifest,
    pub process_type: String,
    /// Bytes fed to the process's stdin.
    #[serde(default)]
    pub input: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// Remove an app and everything it runs.
///
/// DELETE /v1/apps/{app_id}
async fn remove_app(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(app_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let request_id = ctx.request_id.clone();

    let removed = state.scheduler().remove(&ctx.operation(), &app_id).await;
    if matches!(removed, Ok(()) | Err(SchedulerError::AppNotFound(_))) {
        state.forget_deploys(&app_id).await;
    }
    removed.map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    info!(request_id = %request_id, app_id = %app_id, "App removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Run a one-off process and return its combined output.
///
/// POST /v1/apps/{app_id}/run
async fn run_process(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(app_id): Path<String>,
    Json(req): Json<RunRequest>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();

    let app = req
        .app
        .into_app(&app_id)
        .map_err(|e| e.with_request_id(request_id.clone()))?;
    let process = app.process(&req.process_type).cloned().ok_or_else(|| {
        ApiError::not_found(
            "process_not_found",
            format!("app {} has no process of type {}", app.name, req.process_type),
        )
        .with_request_id(request_id.clone())
    })?;

    info!(
        request_id = %request_id,
        app_id = %app_id,
        process_type = %process.process_type,
        "Running one-off process"
    );

    let op = ctx.operation().with_timeout(state.submit_timeout());
    let mut input = req.input.as_bytes();
    let mut output = Vec::new();
    state
        .scheduler()
        .run(&op, &app, &process, &mut input, &mut output)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    )
        .into_response())
}
