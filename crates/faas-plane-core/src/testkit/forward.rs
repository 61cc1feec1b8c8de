//! Mock [`Forwarder`] for testing.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;

use faas_plane_common::PlatformError;

use crate::forward::{Forwarder, InvocationRequest, InvocationResponse, RouteTarget};

/// A forwarder that records every delivery and answers `200`.
///
/// The response body is `"{name} {METHOD} {path_and_query}"` so tests can
/// see what reached the container.
#[derive(Default)]
pub struct RecordingForwarder {
    calls: Mutex<Vec<(RouteTarget, InvocationRequest)>>,
    invalidated: Mutex<Vec<RouteTarget>>,
    fail_next: AtomicUsize,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` deliveries fail with `ServiceUnavailable`.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of deliveries attempted.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Every delivery in order.
    pub fn calls(&self) -> Vec<(RouteTarget, InvocationRequest)> {
        self.calls.lock().clone()
    }

    /// Targets invalidated so far, in order.
    pub fn invalidated(&self) -> Vec<RouteTarget> {
        self.invalidated.lock().clone()
    }

    /// Target of the most recent delivery.
    pub fn last_target(&self) -> Option<RouteTarget> {
        self.calls.lock().last().map(|(target, _)| target.clone())
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(
        &self,
        target: &RouteTarget,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, PlatformError> {
        let body = format!(
            "{} {} {}",
            target.name,
            request.method,
            request.path_and_query()
        );
        self.calls.lock().push((target.clone(), request));

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PlatformError::unavailable(format!(
                "connection refused by {target}"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        Ok(InvocationResponse::full(StatusCode::OK, headers, body))
    }

    fn invalidate(&self, target: &RouteTarget) {
        self.invalidated.lock().push(target.clone());
    }
}
