//! Routing proxy.
//!
//! Forwards invocations to the container the discovery cache resolves and
//! relays the response body as a stream. Transport failures are classified
//! so the caller can tell an unreachable container (503) from a stuck one
//! (504).

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use http::HeaderMap;
use http::header::{self, HeaderName};
use tracing::{debug, warn};
use url::Url;

use faas_plane_common::{PlatformError, ProxyConfig};
use faas_plane_core::{
    ContainerBinding, Forwarder, InvocationRequest, InvocationResponse, RouteTarget,
};

use crate::discovery::DiscoveryCache;

/// Headers that describe a single hop and are never forwarded.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Copy `headers` without hop-by-hop headers, `Host` and `Content-Length`.
///
/// Header names listed in `Connection` are dropped as well.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || listed.iter().any(|l| l == name.as_str())
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Strip hop-by-hop headers from an upstream response.
pub fn response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !HOP_BY_HOP.contains(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Classify a reqwest failure.
///
/// Connect errors are checked first: a dial timeout means the container is
/// unreachable, not slow.
pub(crate) fn classify(error: &reqwest::Error, timeout: Duration) -> PlatformError {
    if error.is_connect() {
        PlatformError::unavailable(format!("connection failed: {error}"))
    } else if error.is_timeout() {
        PlatformError::GatewayTimeout {
            duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        PlatformError::internal(format!("upstream request failed: {error}"))
    }
}

/// Convert a reqwest response into an [`InvocationResponse`] without
/// buffering the body.
pub(crate) fn stream_response(response: reqwest::Response) -> InvocationResponse {
    let status = response.status();
    let headers = response_headers(response.headers());
    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(io::Error::other))
        .boxed();

    InvocationResponse {
        status,
        headers,
        body,
    }
}

/// Forwards invocations to function containers on the compute network.
pub struct RoutingProxy {
    client: reqwest::Client,
    discovery: Arc<DiscoveryCache>,
    upstream_timeout: Duration,
}

impl RoutingProxy {
    pub fn new(discovery: Arc<DiscoveryCache>, config: &ProxyConfig) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PlatformError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            discovery,
            upstream_timeout: config.upstream_timeout(),
        })
    }

    /// The discovery cache used to resolve targets.
    pub fn discovery(&self) -> &Arc<DiscoveryCache> {
        &self.discovery
    }
}

/// `http://{address}:{port}{path}?{query}`.
pub fn upstream_url(
    binding: &ContainerBinding,
    request: &InvocationRequest,
) -> Result<Url, PlatformError> {
    let mut url = Url::parse(&format!("http://{}", binding.authority()))
        .map_err(|e| PlatformError::internal(format!("invalid upstream address: {e}")))?;

    if request.path.starts_with('/') {
        url.set_path(&request.path);
    } else {
        url.set_path(&format!("/{}", request.path));
    }
    url.set_query(request.query.as_deref().filter(|q| !q.is_empty()));
    Ok(url)
}

#[async_trait]
impl Forwarder for RoutingProxy {
    async fn forward(
        &self,
        target: &RouteTarget,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, PlatformError> {
        let binding = self.discovery.resolve(target).await?;
        let url = upstream_url(&binding, &request)?;

        debug!(target = %target, method = %request.method, url = %url, "Proxying request");

        let result = self
            .client
            .request(request.method.clone(), url)
            .headers(forwardable_headers(&request.headers))
            .body(request.body)
            .send()
            .await;

        match result {
            Ok(response) => Ok(stream_response(response)),
            Err(e) => {
                let error = classify(&e, self.upstream_timeout);
                if matches!(error, PlatformError::ServiceUnavailable { .. }) {
                    self.discovery.evict(target, &binding.container_id);
                }
                warn!(target = %target, container = %binding.container_id, error = %error, "Upstream request failed");
                Err(error)
            }
        }
    }

    fn invalidate(&self, target: &RouteTarget) {
        self.discovery.invalidate(target);
    }
}
