//! HTTP API handlers and routing.

pub mod error;
mod health;
pub mod request_context;
mod v1;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

pub use v1::{AppManifest, ExposureManifest, ProcessManifest, RunRequest};

/// Create the main API router with all routes and middleware.
///
/// Cross-origin requests are only answered for `allowed_origins`; with an
/// empty list no CORS headers are sent at all.
pub fn create_router(state: AppState, allowed_origins: &[HeaderValue]) -> Router {
    let router = Router::new()
        .merge(health::routes())
        .nest("/v1", v1::routes())
        .layer(TraceLayer::new_for_http());

    let router = if allowed_origins.is_empty() {
        router
    } else {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([
                header::CONTENT_TYPE,
                HeaderName::from_static(request_context::REQUEST_ID_HEADER),
            ])
            .allow_origin(AllowOrigin::list(allowed_origins.iter().cloned()));
        router.layer(cors)
    };

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;

    fn router() -> Router {
        create_router(AppState::from_config(&Config::default()), &[])
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::options("/v1/apps/app_1/deploys")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_cross_origin_preflight_refused_by_default() {
        let response = router().oneshot(preflight("https://evil.example")).await.unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_cross_origin_preflight_for_configured_origins() {
        let console = HeaderValue::from_static("https://console.acme.test");
        let router = create_router(AppState::from_config(&Config::default()), &[console.clone()]);

        let response = router.clone().oneshot(preflight("https://console.acme.test")).await.unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&console)
        );

        let response = router.oneshot(preflight("https://evil.example")).await.unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_run_refused_by_default() {
        let body = serde_json::json!({
            "app": {
                "name": "acme",
                "release": "v1",
                "processes": [{"type": "run", "image": "acme/web", "command": ["id"]}]
            },
            "process_type": "run"
        });
        let response = router()
            .oneshot(
                Request::post("/v1/apps/app_1/run")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let problem: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(problem["code"], "unsupported_operation");
    }

    #[tokio::test]
    async fn test_unknown_app_instances() {
        let response = router()
            .oneshot(
                Request::get("/v1/apps/app_missing/instances")
                    .header(request_context::REQUEST_ID_HEADER, "req_test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let problem: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(problem["code"], "app_not_found");
        assert_eq!(problem["request_id"], "req_test");
    }

    #[tokio::test]
    async fn test_malformed_manifest() {
        let response = router()
            .oneshot(
                Request::post("/v1/apps/app_1/deploys")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"name": "acme"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
