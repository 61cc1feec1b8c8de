//! Controller request handlers.
//!
//! Tenant identity comes from the configured tenant header (`X-User-ID` by
//! default). Management routes require it; invocation and listing fall
//! back to unowned functions when it is absent.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::json;
use tracing::{info, instrument};

use faas_plane_common::PlatformError;
use faas_plane_core::{FunctionSpec, FunctionView, InvocationRequest, StartOutcome, StopOutcome};

use crate::request::{LogsQuery, invocation_request};
use crate::response::{ApiError, json_response, stream_to_response};
use crate::state::AppState;

/// `POST /register`
#[instrument(skip(state, headers, body))]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let owner = state.require_tenant(&headers)?;
    let spec: FunctionSpec = serde_json::from_slice(&body)
        .map_err(|e| PlatformError::validation(format!("Invalid request body: {e}")))?;

    let record = state.manager().register(Some(&owner), spec).await?;

    Ok(json_response(
        StatusCode::CREATED,
        json!({ "message": format!("Function '{}' registered successfully", record.name) }),
    ))
}

/// `POST /start/{name}`
#[instrument(skip(state, headers))]
pub async fn start(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let tenant = state.require_tenant(&headers)?;

    let body = match state.manager().start(&tenant, &name).await? {
        StartOutcome::Started { container_id } => json!({
            "message": format!("Function '{name}' started successfully"),
            "running": true,
            "container": container_id,
        }),
        StartOutcome::AlreadyRunning { container_id } => json!({
            "message": format!("Function '{name}' is already running"),
            "running": true,
            "container": container_id,
        }),
    };
    Ok(json_response(StatusCode::OK, body))
}

/// `POST /stop/{name}`
#[instrument(skip(state, headers))]
pub async fn stop(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let tenant = state.require_tenant(&headers)?;

    let message = match state.manager().stop(&tenant, &name).await? {
        StopOutcome::Stopped { .. } => format!("Function '{name}' stopped successfully"),
        StopOutcome::NotRunning => format!("Function '{name}' is not running"),
    };
    Ok(json_response(
        StatusCode::OK,
        json!({ "message": message, "running": false }),
    ))
}

/// `DELETE /delete/{name}`
#[instrument(skip(state, headers))]
pub async fn delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let tenant = state.require_tenant(&headers)?;
    state.manager().delete(&tenant, &name).await?;

    Ok(json_response(
        StatusCode::OK,
        json!({
            "message": format!("Function '{name}' deleted successfully"),
            "status": "success",
        }),
    ))
}

/// `GET /list`: functions visible to the calling tenant.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<BTreeMap<String, FunctionView>> {
    let tenant = state.tenant(&headers);
    Json(state.manager().list(tenant.as_deref()).await)
}

/// `GET /list/{tenant}`: functions owned by `tenant`.
pub async fn list_tenant(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Json<BTreeMap<String, FunctionView>> {
    Json(state.manager().list_owned(&tenant).await)
}

/// `ANY /invoke/{name}`
pub async fn invoke(
    State(state): State<AppState>,
    Path(name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = invocation_request(method, &uri, headers, body, None);
    dispatch(&state, &name, request).await
}

/// `ANY /invoke/{name}/{*path}`
pub async fn invoke_path(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = invocation_request(method, &uri, headers, body, Some(&path));
    dispatch(&state, &name, request).await
}

#[instrument(skip(state, request), fields(method = %request.method, path = %request.path))]
async fn dispatch(
    state: &AppState,
    name: &str,
    request: InvocationRequest,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    let tenant = state.tenant(&request.headers);

    let response = state
        .manager()
        .invoke(tenant.as_deref(), name, request)
        .await?;

    info!(
        status = response.status.as_u16(),
        duration_ms = start.elapsed().as_millis(),
        "Invocation forwarded"
    );
    Ok(stream_to_response(response))
}

/// `GET /logs/{name}?lines=N` as plain text.
#[instrument(skip(state, headers, query))]
pub async fn logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let tenant = state.tenant(&headers);
    let logs = state
        .manager()
        .logs(tenant.as_deref(), &name, query.lines())
        .await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        logs.logs,
    )
        .into_response())
}

/// `GET /logs-json/{name}?lines=N`
///
/// A function without a container yields empty logs rather than an error.
#[instrument(skip(state, headers, query))]
pub async fn logs_json(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let tenant = state.tenant(&headers);

    match state
        .manager()
        .logs(tenant.as_deref(), &name, query.lines())
        .await
    {
        Ok(logs) => Ok(json_response(
            StatusCode::OK,
            json!({
                "logs": logs.logs,
                "running": logs.running,
                "container": logs.container_id,
                "timestamp": chrono::Utc::now().timestamp(),
            }),
        )),
        Err(PlatformError::NotRunning { .. }) => Ok(json_response(
            StatusCode::OK,
            json!({
                "logs": "",
                "message": "Function is not running",
                "running": false,
            }),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Health check handler.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
