//! Cold-start readiness probing.
//!
//! A freshly created container needs a moment before its server listens.
//! Rather than sleeping a fixed interval, the container is polled with
//! exponential backoff until it accepts a TCP connection, it exits, or the
//! overall deadline passes.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, warn};

use faas_plane_common::{PlatformError, ReadinessConfig};

use crate::function::ContainerBinding;
use crate::runtime::ContainerRuntime;

/// Outcome of a readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The container is running and accepting connections.
    Ready,
    /// The container is running but did not accept a connection before the
    /// deadline. The request is forwarded anyway.
    DeadlineElapsed,
}

/// Poll `binding` until it is ready to serve.
///
/// Fails with `ServiceUnavailable` if the container stops or disappears
/// while being polled.
pub async fn wait_until_ready(
    runtime: &dyn ContainerRuntime,
    binding: &ContainerBinding,
    config: &ReadinessConfig,
) -> Result<Readiness, PlatformError> {
    if config.settle_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(config.settle_delay_ms)).await;
    }

    let deadline = Instant::now() + config.deadline();
    let max_backoff = Duration::from_millis(config.max_backoff_ms.max(1));
    let mut backoff = Duration::from_millis(config.initial_backoff_ms.max(1)).min(max_backoff);
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match runtime.inspect(&binding.container_id).await {
            Ok(status) if !status.running => {
                return Err(PlatformError::unavailable(format!(
                    "container {} exited during startup",
                    binding.container_id
                )));
            }
            Ok(_) => {
                if !config.tcp_probe {
                    return Ok(Readiness::Ready);
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                let probe = backoff.min(remaining).max(Duration::from_millis(1));
                if let Ok(Ok(_)) =
                    tokio::time::timeout(probe, TcpStream::connect(binding.authority())).await
                {
                    debug!(container = %binding.container_id, attempts, "Container accepting connections");
                    return Ok(Readiness::Ready);
                }
            }
            Err(e) if e.is_not_found() => {
                return Err(PlatformError::unavailable(format!(
                    "container {} disappeared during startup",
                    binding.container_id
                )));
            }
            Err(e) => {
                debug!(container = %binding.container_id, error = %e, "Readiness inspect failed");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                container = %binding.container_id,
                address = %binding.authority(),
                attempts,
                "Container not ready before deadline, forwarding anyway"
            );
            return Ok(Readiness::DeadlineElapsed);
        }

        tokio::time::sleep(backoff.min(deadline - now)).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}
