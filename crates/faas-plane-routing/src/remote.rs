//! Forwarding to a routing proxy running as a separate service.

use std::time::Duration;

use async_trait::async_trait;
use http::HeaderValue;
use tracing::{debug, warn};
use url::Url;

use faas_plane_common::{PlatformError, ProxyConfig};
use faas_plane_core::{Forwarder, InvocationRequest, InvocationResponse, RouteTarget};

use crate::proxy::{classify, forwardable_headers, stream_response};

/// Header carrying the owning tenant to a remote routing proxy.
///
/// An empty value scopes the request to unowned containers; an absent
/// header matches any tenant.
pub const TENANT_HEADER: &str = "x-function-tenant";

/// Sends invocations to `{remote_url}/function/{name}[/subpath]`.
pub struct RemoteForwarder {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
}

impl RemoteForwarder {
    pub fn new(config: &ProxyConfig) -> Result<Self, PlatformError> {
        let base = Url::parse(&config.remote_url).map_err(|e| {
            PlatformError::config(format!("invalid proxy.remote_url '{}': {e}", config.remote_url))
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.remote_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PlatformError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            timeout: config.remote_timeout(),
        })
    }

    /// URL of `request` on the remote proxy.
    pub fn url_for(&self, name: &str, request: &InvocationRequest) -> Url {
        let mut url = self.base.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        let subpath = request.path.trim_start_matches('/');

        if subpath.is_empty() {
            url.set_path(&format!("{prefix}/function/{name}"));
        } else {
            url.set_path(&format!("{prefix}/function/{name}/{subpath}"));
        }
        url.set_query(request.query.as_deref().filter(|q| !q.is_empty()));
        url
    }
}

#[async_trait]
impl Forwarder for RemoteForwarder {
    async fn forward(
        &self,
        target: &RouteTarget,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, PlatformError> {
        let url = self.url_for(&target.name, &request);

        let mut headers = forwardable_headers(&request.headers);
        headers.remove(TENANT_HEADER);
        if let Some(tenant) = target.tenant.as_deref() {
            let value = HeaderValue::from_str(tenant)
                .map_err(|_| PlatformError::validation(format!("invalid tenant '{tenant}'")))?;
            headers.insert(TENANT_HEADER, value);
        }

        debug!(target = %target, url = %url, "Forwarding to remote proxy");

        self.client
            .request(request.method.clone(), url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map(stream_response)
            .map_err(|e| {
                let error = classify(&e, self.timeout);
                warn!(target = %target, error = %error, "Remote proxy request failed");
                error
            })
    }
}
