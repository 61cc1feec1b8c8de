//! Routing proxy HTTP surface.
//!
//! # Endpoints
//!
//! - `ANY /function/{name}` and `ANY /function/{name}/{*path}` - Forward to
//!   the function's container
//! - `GET /functions` - Containers carrying a discovery label
//! - `GET /health` - Liveness with the current time
//!
//! The owning tenant arrives in the `X-Function-Tenant` header set by a
//! remote controller. It scopes discovery and is not forwarded. An empty
//! value selects unowned containers; without the header any tenant matches.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use tracing::instrument;

use faas_plane_common::PlatformError;
use faas_plane_core::{Forwarder, RouteTarget};
use faas_plane_routing::{DiscoveredFunction, RoutingProxy, TENANT_HEADER};

use crate::request::invocation_request;
use crate::response::{ApiError, stream_to_response};
use crate::router::with_middleware;

/// State shared by the proxy handlers.
#[derive(Clone)]
pub struct ProxyState {
    proxy: Arc<RoutingProxy>,
}

impl ProxyState {
    pub fn new(proxy: Arc<RoutingProxy>) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &RoutingProxy {
        &self.proxy
    }
}

/// Build the routing proxy router.
pub fn build_proxy_router(state: ProxyState, request_timeout: Duration) -> Router {
    let router = Router::new()
        .route("/function/:name", any(proxy_function))
        .route("/function/:name/*path", any(proxy_function_path))
        .route("/functions", get(list_functions))
        .route("/health", get(health));

    with_middleware(router, request_timeout).with_state(state)
}

async fn proxy_function(
    State(state): State<ProxyState>,
    Path(name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    forward(&state, name, method, &uri, headers, body, None).await
}

async fn proxy_function_path(
    State(state): State<ProxyState>,
    Path((name, path)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    forward(&state, name, method, &uri, headers, body, Some(&path)).await
}

#[instrument(skip(state, uri, headers, body, subpath))]
async fn forward(
    state: &ProxyState,
    name: String,
    method: Method,
    uri: &Uri,
    mut headers: HeaderMap,
    body: Bytes,
    subpath: Option<&str>,
) -> Result<Response, ApiError> {
    let tenant = match headers.remove(TENANT_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| PlatformError::validation("invalid tenant header"))?
                .trim()
                .to_string(),
        ),
        None => None,
    };

    let target = RouteTarget::new(name, tenant);
    let request = invocation_request(method, uri, headers, body, subpath);
    let response = state.proxy.forward(&target, request).await?;
    Ok(stream_to_response(response))
}

/// `GET /functions`
async fn list_functions(
    State(state): State<ProxyState>,
) -> Result<Json<Vec<DiscoveredFunction>>, ApiError> {
    Ok(Json(state.proxy.discovery().discovered().await?))
}

/// `GET /health`
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}
