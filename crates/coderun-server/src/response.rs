//! HTTP responses for the execute API.
//!
//! Successful executions and failed executions both answer `200` with the
//! adapter body; only requests the service refuses to run get an
//! [`ApiError`].

use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use coderun_core::AdapterResponse;

/// Header carrying the id assigned to each execute request.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A refused request, rendered as `{"error": message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// Create a `400 Bad Request` error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// Render an adapter body, tagged with the request id.
pub fn adapter_response(body: AdapterResponse, request_id: &str) -> Response {
    let mut response = (StatusCode::OK, Json(body)).into_response();

    if let Ok(value) = HeaderValue::try_from(request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    response
}
