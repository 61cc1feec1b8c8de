//! Invocation forwarding.
//!
//! Once a function's container is healthy the lifecycle manager hands the
//! request to a [`Forwarder`]. The routing proxy implements it in-process;
//! a remote forwarder implements it by calling a proxy over HTTP.

use std::fmt;
use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use http::{HeaderMap, Method, StatusCode};

use faas_plane_common::PlatformError;

/// The function a request is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteTarget {
    /// Function name (the discovery label value).
    pub name: String,
    /// Tenant that owns the function.
    ///
    /// `Some("")` only matches containers without a tenant label. `None`
    /// matches any tenant and is reserved for callers with no context.
    pub tenant: Option<String>,
}

impl RouteTarget {
    pub fn new(name: impl Into<String>, tenant: Option<String>) -> Self {
        Self {
            name: name.into(),
            tenant,
        }
    }

    /// Target scoped to exactly `tenant`, where `""` means unowned.
    pub fn scoped(name: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self::new(name, Some(tenant.into()))
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tenant {
            Some(tenant) if !tenant.is_empty() => write!(f, "{tenant}/{}", self.name),
            Some(_) => write!(f, "(unowned)/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An inbound invocation, independent of the HTTP server.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub method: Method,
    /// Path forwarded to the container, always starting with `/`.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InvocationRequest {
    /// A `GET /` request with no headers or body.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Path plus query string.
    pub fn path_and_query(&self) -> String {
        match self.query.as_deref() {
            Some(q) if !q.is_empty() => format!("{}?{q}", self.path),
            _ => self.path.clone(),
        }
    }
}

/// Streaming body of an upstream response.
pub type BodyStream = BoxStream<'static, Result<Bytes, io::Error>>;

/// Response from a function container.
///
/// The body is a stream so large responses are relayed without buffering.
pub struct InvocationResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl InvocationResponse {
    /// A response with a fully buffered body.
    pub fn full(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            headers,
            body: stream::once(async move { Ok(body) }).boxed(),
        }
    }

    /// Buffer the whole body.
    pub async fn collect(mut self) -> Result<Bytes, io::Error> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for InvocationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Delivers an invocation to a function's container.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        target: &RouteTarget,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, PlatformError>;

    /// Forget any cached route for `target`.
    fn invalidate(&self, _target: &RouteTarget) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_and_query() {
        let mut req = InvocationRequest::get("/hello");
        assert_eq!(req.path_and_query(), "/hello");

        req.query = Some("a=1&b=2".into());
        assert_eq!(req.path_and_query(), "/hello?a=1&b=2");

        req.query = Some(String::new());
        assert_eq!(req.path_and_query(), "/hello");
    }

    #[tokio::test]
    async fn test_collect_streamed_body() {
        let chunks = vec![Ok(Bytes::from_static(b"hel")), Ok(Bytes::from_static(b"lo"))];
        let response = InvocationResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: stream::iter(chunks).boxed(),
        };
        assert_eq!(response.collect().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_route_target_display() {
        assert_eq!(RouteTarget::new("echo", Some("t1".into())).to_string(), "t1/echo");
        assert_eq!(RouteTarget::new("echo", None).to_string(), "echo");
        assert_eq!(RouteTarget::scoped("echo", "").to_string(), "(unowned)/echo");
    }
}
