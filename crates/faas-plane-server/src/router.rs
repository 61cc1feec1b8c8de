//! HTTP router configuration.
//!
//! This module builds the controller router and the middleware stack shared
//! with the routing proxy surface.

use std::time::Duration;

use axum::Router;
use axum::routing::{any, delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::AppState;

/// Build the controller router.
///
/// Routes:
/// - `POST /register` - Register or update a function
/// - `POST /start/:name` - Start a function's container
/// - `POST /stop/:name` - Stop a function's container
/// - `DELETE /delete/:name` - Delete a function
/// - `GET /list` - Functions visible to the calling tenant
/// - `GET /list/:tenant` - Functions owned by a tenant
/// - `ANY /invoke/:name[/*path]` - Invoke a function
/// - `GET /logs/:name` - Container output as text
/// - `GET /logs-json/:name` - Container output as JSON
/// - `GET /health` - Health check
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let management_routes = Router::new()
        .route("/register", post(handler::register))
        .route("/start/:name", post(handler::start))
        .route("/stop/:name", post(handler::stop))
        .route("/delete/:name", delete(handler::delete))
        .route("/list", get(handler::list))
        .route("/list/:tenant", get(handler::list_tenant));

    let invoke_routes = Router::new()
        .route("/invoke/:name", any(handler::invoke))
        .route("/invoke/:name/*path", any(handler::invoke_path));

    let observability_routes = Router::new()
        .route("/logs/:name", get(handler::logs))
        .route("/logs-json/:name", get(handler::logs_json))
        .route("/health", get(handler::health_check));

    let router = Router::new()
        .merge(management_routes)
        .merge(invoke_routes)
        .merge(observability_routes);

    with_middleware(router, request_timeout).with_state(state)
}

/// Tracing, request timeout and permissive CORS.
///
/// CORS is permissive because the authenticating gateway sits in front.
pub fn with_middleware<S>(router: Router<S>, request_timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
