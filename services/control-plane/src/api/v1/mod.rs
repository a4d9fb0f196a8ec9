//! API v1 routes.

mod apps;
mod certs;
mod deploys;
mod instances;

use axum::Router;

use crate::state::AppState;

pub use apps::{AppManifest, ExposureManifest, ProcessManifest, RunRequest};

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/apps", apps::routes())
        // Deploys are nested under apps: /v1/apps/{app_id}/deploys
        .nest("/apps/{app_id}/deploys", deploys::routes())
        .nest("/apps/{app_id}/instances", instances::app_routes())
        .nest("/instances", instances::routes())
        .nest("/certs", certs::routes())
}
