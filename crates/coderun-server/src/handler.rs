//! Request handlers for the execute API.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::request::ExecuteRequest;
use crate::response::{ApiError, adapter_response};
use crate::state::AppState;

/// Compile and run a submission.
///
/// This handler:
/// 1. Validates the body against the service limits
/// 2. Hands the source and context to the orchestrator
/// 3. Returns the adapter body, whether or not the submission succeeded
#[instrument(skip_all, fields(request_id = tracing::field::Empty))]
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    tracing::Span::current().record("request_id", request_id.as_str());

    if let Err(reason) = request.validate(state.limits()) {
        warn!(reason = %reason, "Rejected execute request");
        return Err(ApiError::bad_request(reason));
    }

    info!(
        source_bytes = request.source.len(),
        level = %request.context.optimization_level(),
        "Handling execute request"
    );

    let result = state
        .orchestrator()
        .execute(&request.source, &request.context)
        .await;

    info!(
        success = result.success,
        exit_code = result.exit_code,
        duration_ms = start.elapsed().as_millis(),
        "Request completed"
    );

    Ok(adapter_response(result.to_adapter(), &request_id))
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
///
/// The toolchain was probed at startup, so a running server is ready; the
/// body reports current load and the requests holding a workspace.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = state.orchestrator();

    let requests: Vec<_> = orchestrator
        .in_flight()
        .into_iter()
        .map(|(workspace_id, request)| {
            serde_json::json!({
                "workspace_id": workspace_id,
                "state": request.state,
                "started_at": request.started_at,
            })
        })
        .collect();

    let body = serde_json::json!({
        "status": "ready",
        "toolchain": orchestrator.toolchain().name(),
        "in_flight": requests.len(),
        "max_concurrent": orchestrator.max_concurrent(),
        "requests": requests,
    });

    (StatusCode::OK, Json(body))
}
