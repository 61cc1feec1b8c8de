//! Integration tests for the routing proxy.
//!
//! Each test runs a real HTTP upstream on a loopback port and points an
//! in-memory runtime's container at it:
//! - Request forwarding (method, path, query, headers, body)
//! - Streaming responses
//! - Failure classification (404, 503, 504)
//! - Cache correctness across container replacement
//! - Tenant scoping of lifecycle-launched containers

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::any;
use futures_util::stream;

use faas_plane_common::{DiscoveryConfig, PlatformError, ProxyConfig};
use faas_plane_core::testkit::runtime::labels;
use faas_plane_core::testkit::{MockRuntime, RecordingForwarder, config};
use faas_plane_core::{
    ContainerSpec, Forwarder, FunctionRecord, FunctionSpec, InvocationRequest, LifecycleManager,
    RegistryStore, RouteTarget, StartOutcome,
};
use faas_plane_routing::{DiscoveryCache, RoutingProxy};

// ============================================================================
// Helpers
// ============================================================================

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    format!(
        "{method} {uri} auth={} custom={} body={}",
        header("authorization"),
        header("x-custom"),
        String::from_utf8_lossy(&body)
    )
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "too late"
}

async fn chunked() -> Body {
    let chunks = vec![
        Ok::<_, std::io::Error>(Bytes::from_static(b"one,")),
        Ok(Bytes::from_static(b"two,")),
        Ok(Bytes::from_static(b"three")),
    ];
    Body::from_stream(stream::iter(chunks))
}

async fn teapot() -> (StatusCode, [(&'static str, &'static str); 1], &'static str) {
    (StatusCode::IM_A_TEAPOT, [("x-upstream", "yes")], "short and stout")
}

/// Start an upstream server and return its port.
async fn start_upstream() -> u16 {
    let app = Router::new()
        .route("/slow", any(slow))
        .route("/chunked", any(chunked))
        .route("/teapot", any(teapot))
        .fallback(echo);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn spawn_container(runtime: &MockRuntime, name: &str, port: u16) -> String {
    let port = port.to_string();
    runtime.spawn_external(ContainerSpec {
        labels: labels([("function", name), ("platform.port", port.as_str())]),
        ..Default::default()
    })
}

fn proxy(runtime: &Arc<MockRuntime>, upstream_timeout_ms: u64) -> RoutingProxy {
    let discovery = Arc::new(DiscoveryCache::new(
        runtime.clone(),
        DiscoveryConfig::default(),
    ));
    let config = ProxyConfig {
        upstream_timeout_ms,
        connect_timeout_ms: 500,
        ..Default::default()
    };
    RoutingProxy::new(discovery, &config).unwrap()
}

// ============================================================================
// Test: Forwarding
// ============================================================================

#[tokio::test]
async fn test_forwards_request_verbatim() {
    let port = start_upstream().await;
    let runtime = Arc::new(MockRuntime::new());
    spawn_container(&runtime, "echo", port);
    let proxy = proxy(&runtime, 2000);

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    headers.insert("x-custom", "42".parse().unwrap());
    headers.insert("host", "controller.local".parse().unwrap());
    let request = InvocationRequest {
        method: Method::POST,
        path: "/items/7".into(),
        query: Some("verbose=true".into()),
        headers,
        body: Bytes::from_static(b"payload"),
    };

    let response = proxy
        .forward(&RouteTarget::new("echo", None), request)
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);

    let body = response.collect().await.unwrap();
    assert_eq!(
        String::from_utf8_lossy(&body),
        "POST /items/7?verbose=true auth=Bearer secret custom=42 body=payload"
    );
}

#[tokio::test]
async fn test_upstream_status_and_headers_pass_through() {
    let port = start_upstream().await;
    let runtime = Arc::new(MockRuntime::new());
    spawn_container(&runtime, "echo", port);
    let proxy = proxy(&runtime, 2000);

    let response = proxy
        .forward(&RouteTarget::new("echo", None), InvocationRequest::get("/teapot"))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::IM_A_TEAPOT);
    assert_eq!(response.headers.get("x-upstream").unwrap(), "yes");
    assert_eq!(response.collect().await.unwrap(), Bytes::from_static(b"short and stout"));
}

#[tokio::test]
async fn test_streams_chunked_response() {
    let port = start_upstream().await;
    let runtime = Arc::new(MockRuntime::new());
    spawn_container(&runtime, "echo", port);
    let proxy = proxy(&runtime, 2000);

    let response = proxy
        .forward(&RouteTarget::new("echo", None), InvocationRequest::get("/chunked"))
        .await
        .unwrap();
    assert_eq!(
        response.collect().await.unwrap(),
        Bytes::from_static(b"one,two,three")
    );
}

// ============================================================================
// Test: Failure Classification
// ============================================================================

#[tokio::test]
async fn test_unknown_function_is_not_found() {
    let runtime = Arc::new(MockRuntime::new());
    let proxy = proxy(&runtime, 2000);

    let err = proxy
        .forward(&RouteTarget::new("nope", None), InvocationRequest::get("/"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_connect_failure_is_unavailable_and_evicts() {
    let port = closed_port().await;
    let runtime = Arc::new(MockRuntime::new());
    spawn_container(&runtime, "echo", port);
    let proxy = proxy(&runtime, 2000);
    let target = RouteTarget::new("echo", None);

    let err = proxy
        .forward(&target, InvocationRequest::get("/"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::ServiceUnavailable { .. }));
    assert!(proxy.discovery().peek(&target).is_none());
}

#[tokio::test]
async fn test_unresponsive_upstream_is_gateway_timeout() {
    let port = start_upstream().await;
    let runtime = Arc::new(MockRuntime::new());
    spawn_container(&runtime, "echo", port);
    let proxy = proxy(&runtime, 200);

    let err = proxy
        .forward(&RouteTarget::new("echo", None), InvocationRequest::get("/slow"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::GatewayTimeout { duration_ms: 200 }));
}

// ============================================================================
// Test: Cache Correctness
// ============================================================================

#[tokio::test]
async fn test_restart_routes_to_new_container() {
    let old_port = start_upstream().await;
    let new_port = start_upstream().await;
    let runtime = Arc::new(MockRuntime::new());
    let proxy = proxy(&runtime, 2000);
    let target = RouteTarget::new("echo", None);

    let old = spawn_container(&runtime, "echo", old_port);
    proxy
        .forward(&target, InvocationRequest::get("/"))
        .await
        .unwrap();
    assert_eq!(proxy.discovery().peek(&target).unwrap().container_id, old);

    runtime.remove_out_of_band(&old);
    let new = spawn_container(&runtime, "echo", new_port);

    proxy
        .forward(&target, InvocationRequest::get("/"))
        .await
        .unwrap();
    let binding = proxy.discovery().peek(&target).unwrap();
    assert_eq!(binding.container_id, new);
    assert_eq!(binding.port, new_port);
}

#[tokio::test]
async fn test_stopped_function_is_dropped_from_cache() {
    let port = start_upstream().await;
    let runtime = Arc::new(MockRuntime::new());
    let mut platform = config::platform();
    platform.discovery.default_port = port;
    let discovery = Arc::new(DiscoveryCache::new(
        runtime.clone(),
        platform.discovery.clone(),
    ));
    let proxy = Arc::new(RoutingProxy::new(discovery, &platform.proxy).unwrap());
    let manager = LifecycleManager::new(
        RegistryStore::in_memory(),
        runtime.clone(),
        proxy.clone(),
        &platform,
    );

    manager
        .register(Some("t1"), FunctionSpec::new("echo", "registry/echo"))
        .await
        .unwrap();
    manager
        .invoke(Some("t1"), "echo", InvocationRequest::get("/"))
        .await
        .unwrap();
    let target = RouteTarget::scoped("echo", "t1");
    assert!(proxy.discovery().peek(&target).is_some());

    manager.stop("t1", "echo").await.unwrap();
    assert!(proxy.discovery().peek(&target).is_none());
}

// ============================================================================
// Test: Tenant Scoping
// ============================================================================

fn started(outcome: StartOutcome) -> String {
    match outcome {
        StartOutcome::Started { container_id } => container_id,
        StartOutcome::AlreadyRunning { container_id } => {
            panic!("expected a new container, {container_id} was already running")
        }
    }
}

#[tokio::test]
async fn test_unowned_function_never_resolves_to_tenant_container() {
    let runtime = Arc::new(MockRuntime::new());
    let forwarder = Arc::new(RecordingForwarder::new());
    let manager = LifecycleManager::new(
        RegistryStore::in_memory(),
        runtime.clone(),
        forwarder.clone(),
        &config::platform(),
    );
    let discovery = DiscoveryCache::new(runtime.clone(), DiscoveryConfig::default());

    manager
        .registry()
        .put(FunctionRecord::new("echo", "img", BTreeMap::new(), None));
    manager
        .register(Some("t1"), FunctionSpec::new("echo", "registry/echo"))
        .await
        .unwrap();

    // The unowned container starts first, so t1's is the newest "echo".
    let unowned = started(manager.start("t2", "echo").await.unwrap());
    let owned = started(manager.start("t1", "echo").await.unwrap());
    assert_ne!(unowned, owned);

    manager
        .invoke(Some("t2"), "echo", InvocationRequest::get("/"))
        .await
        .unwrap();
    let target = forwarder.last_target().unwrap();
    assert_eq!(discovery.resolve(&target).await.unwrap().container_id, unowned);

    manager
        .invoke(Some("t1"), "echo", InvocationRequest::get("/"))
        .await
        .unwrap();
    let target = forwarder.last_target().unwrap();
    assert_eq!(discovery.resolve(&target).await.unwrap().container_id, owned);
}
