//! Deploy endpoints.
//!
//! A deploy submits an app to the scheduler and streams its status records
//! back as the response body, one JSON object per line. The body ends when
//! the scheduler finalizes the stream; the outcome is then available from
//! `GET /v1/apps/{app_id}/deploys/latest`.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use berth_scheduler::{App, Context, JsonLinesStatusStream, Scheduler, StatusStream};
use tokio::io::DuplexStream;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::apps::AppManifest;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::{AppState, DeployRecord};

/// Bytes of status output buffered ahead of a slow client.
const STREAM_BUFFER: usize = 16 * 1024;

type DeployStream = JsonLinesStatusStream<DuplexStream>;

/// Create deploy routes.
///
/// Mounted at /v1/apps/{app_id}/deploys
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_deploy))
        .route("/latest", get(latest_deploy))
}

/// Submit an app and stream deployment status.
///
/// POST /v1/apps/{app_id}/deploys
async fn create_deploy(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(app_id): Path<String>,
    Json(manifest): Json<AppManifest>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();

    let app = manifest
        .into_app(&app_id)
        .map_err(|e| e.with_request_id(request_id.clone()))?;
    app.validate()
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    info!(
        request_id = %request_id,
        app_id = %app.id,
        release = %app.release,
        processes = app.processes.len(),
        "Deploy started"
    );
    let deploy_id = state.begin_deploy(&app.id, &app.release).await;

    let (writer, reader) = tokio::io::duplex(STREAM_BUFFER);
    let stream = Arc::new(JsonLinesStatusStream::new(writer));
    let op = ctx.operation().with_timeout(state.submit_timeout());
    tokio::spawn(drive_deploy(state, op, deploy_id, app, stream));

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, berth_scheduler::CONTENT_TYPE)],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

/// Run a submit to completion, end the response body and record the outcome.
async fn drive_deploy(
    state: AppState,
    ctx: Context,
    deploy_id: String,
    app: App,
    stream: Arc<DeployStream>,
) {
    let submitted: Arc<dyn StatusStream> = stream.clone();
    let result = tokio::select! {
        result = state.scheduler().submit(&ctx, &app, submitted) => result,
        e = ctx.done() => Err(e),
    };
    if let Err(e) = result {
        warn!(
            request_id = ctx.request_id().unwrap_or("-"),
            deploy_id = %deploy_id,
            app_id = %app.id,
            error = %e,
            "Submit returned an error"
        );
        if !stream.wait().is_ready() {
            stream.done(Err(e));
        }
    }

    // Backends may finalize from a background task; stop waiting at the deadline.
    tokio::select! {
        biased;
        _ = stream.wait().ready() => {}
        e = ctx.done() => stream.done(Err(e)),
    }

    let err = stream.err();
    match &err {
        None => info!(deploy_id = %deploy_id, app_id = %app.id, release = %app.release, "Deploy succeeded"),
        Some(e) => warn!(
            deploy_id = %deploy_id,
            app_id = %app.id,
            release = %app.release,
            error = %e,
            "Deploy failed"
        ),
    }
    state.finish_deploy(&app.id, &deploy_id, err).await;

    // Outcome is recorded before the client sees the end of the body.
    if let Err(e) = stream.close().await {
        debug!(app_id = %app.id, error = %e, "Failed to close deploy stream");
    }
}

/// Outcome of the most recent deploy of an app.
///
/// GET /v1/apps/{app_id}/deploys/latest
async fn latest_deploy(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(app_id): Path<String>,
) -> Result<Json<DeployRecord>, ApiError> {
    state.latest_deploy(&app_id).await.map(Json).ok_or_else(|| {
        ApiError::not_found("deploy_not_found", format!("no deploys for app {app_id}"))
            .with_request_id(ctx.request_id)
    })
}
