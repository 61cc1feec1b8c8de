//! HTTP response conversion.
//!
//! Function responses are relayed as streams; platform errors are mapped to
//! a status code and a JSON body `{"error": "..."}`.

use axum::Json;
use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use faas_plane_common::PlatformError;
use faas_plane_core::InvocationResponse;

/// A [`PlatformError`] returned from a handler.
#[derive(Debug)]
pub struct ApiError(pub PlatformError);

impl From<PlatformError> for ApiError {
    fn from(error: PlatformError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_to_response(&self.0)
    }
}

/// Status code for a platform error.
pub fn status_for(error: &PlatformError) -> StatusCode {
    match error {
        PlatformError::Validation { .. } | PlatformError::NotRunning { .. } => {
            StatusCode::BAD_REQUEST
        }
        PlatformError::NotFound { .. } => StatusCode::NOT_FOUND,
        PlatformError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        PlatformError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PlatformError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PlatformError::Internal { .. }
        | PlatformError::Container(_)
        | PlatformError::Io(_)
        | PlatformError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a [`PlatformError`] to an HTTP response.
pub fn error_to_response(error: &PlatformError) -> Response {
    let status = status_for(error);

    let message = match error {
        PlatformError::PermissionDenied { .. } => {
            "You do not have permission to access this function".to_string()
        }
        PlatformError::Io(_) | PlatformError::Config { .. } => "Internal server error".to_string(),
        other => other.to_string(),
    };

    if status.is_server_error() {
        error!(status = status.as_u16(), error = %error, "Request failed");
    } else {
        warn!(status = status.as_u16(), error = %error, "Request rejected");
    }

    (status, Json(json!({ "error": message }))).into_response()
}

/// A JSON body with a status code.
pub fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

/// Relay a function response without buffering its body.
pub fn stream_to_response(upstream: InvocationResponse) -> Response {
    let mut response = Response::new(Body::from_stream(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    response
}
