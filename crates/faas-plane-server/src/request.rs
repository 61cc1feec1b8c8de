//! Conversion of inbound HTTP requests.
//!
//! Invocation routes capture the function name and an optional subpath;
//! everything after the function name is forwarded to the container as
//! the request path.

use axum::http::{HeaderMap, HeaderName, Method, Uri};
use bytes::Bytes;
use serde::Deserialize;

use faas_plane_core::{DEFAULT_LOG_LINES, InvocationRequest};

/// Build the request forwarded to a function container.
///
/// `subpath` is the wildcard capture after `/{name}/`, without the leading
/// slash. The query string is taken verbatim from `uri`.
pub fn invocation_request(
    method: Method,
    uri: &Uri,
    headers: HeaderMap,
    body: Bytes,
    subpath: Option<&str>,
) -> InvocationRequest {
    let path = match subpath {
        Some(sub) => format!("/{}", sub.trim_start_matches('/')),
        None => "/".to_string(),
    };

    InvocationRequest {
        method,
        path,
        query: uri.query().map(String::from),
        headers,
        body,
    }
}

/// Non-empty value of `name`, trimmed.
pub fn header_tenant(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// `?lines=N` on the log endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    lines: Option<String>,
}

impl LogsQuery {
    /// Requested line count; anything but a positive integer means the default.
    pub fn lines(&self) -> usize {
        self.lines
            .as_deref()
            .and_then(|l| l.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_LOG_LINES)
    }
}
