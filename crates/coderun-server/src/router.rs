//! HTTP router configuration.
//!
//! This module provides functions to build the Axum router with all
//! necessary routes and middleware.

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handler::{execute, health_check, readiness_check};
use crate::state::AppState;

/// Build the main application router.
///
/// Routes:
/// - `POST /execute` - Compile and run a submission
/// - `GET /health` - Health check
/// - `GET /ready` - Readiness check
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use coderun_common::RuntimeConfig;
    use coderun_core::{AdapterResponse, Orchestrator, Toolchain};
    use tower::util::ServiceExt;

    /// A router whose "toolchain" is `false`, so every build fails fast.
    fn setup_router(root: &std::path::Path) -> Router {
        let mut config = RuntimeConfig::default();
        config.workspace.root = Some(root.to_path_buf());
        let orchestrator =
            Orchestrator::new(&config, Toolchain::from_parts("false", "fake-toolchain 0.0.0"));
        build_router(
            AppState::new(orchestrator, config.limits),
            Duration::from_secs(30),
        )
    }

    fn post_execute(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_check() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["toolchain"], "fake-toolchain 0.0.0");
        assert_eq!(json["in_flight"], 0);
        assert_eq!(json["max_concurrent"], 4);
        assert_eq!(json["requests"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_empty_source_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path());

        let response = app.oneshot(post_execute(r#"{"source": ""}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_excessive_timeout_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path());

        let response = app
            .oneshot(post_execute(
                r#"{"source": "fn main() {}", "context": {"timeout_secs": 999}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/functions/anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_build_still_answers_with_adapter_shape() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path());

        let response = app
            .oneshot(post_execute(r#"{"source": "fn main() {}"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let body: AdapterResponse = serde_json::from_value(body_json(response).await).unwrap();
        assert!(!body.success);
        assert_eq!(body.exit_code, 1);
        assert!(!body.errors.is_empty());
        assert_eq!(body.metadata.execution_time, 0.0);
        assert_eq!(body.metadata.toolchain_name, "fake-toolchain 0.0.0");
    }
}
