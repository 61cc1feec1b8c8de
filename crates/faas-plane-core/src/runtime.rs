//! Container runtime capability.
//!
//! The lifecycle manager and the discovery cache only talk to containers
//! through [`ContainerRuntime`]. The production implementation drives the
//! Docker Engine API; tests use the in-memory runtime from `testkit`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use faas_plane_common::{ContainerError, ContainerRuntimeConfig};

/// Everything needed to launch one function container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment as `KEY=VALUE` pairs.
    pub env: Vec<String>,
    /// Labels attached to the container.
    pub labels: HashMap<String, String>,
    /// Network the container joins. No host ports are published.
    pub network: String,
    /// Restart policy name.
    pub restart_policy: String,
}

/// Live state of a container as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStatus {
    pub id: String,
    pub image: String,
    pub running: bool,
    /// Address on the compute network, when attached.
    pub address: Option<String>,
    pub labels: HashMap<String, String>,
    /// Creation time as a Unix timestamp.
    pub created: i64,
}

impl ContainerStatus {
    /// Value of a label.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Port declared under `port_label`, or `default` when the label is
    /// absent, unparsable or `0`.
    pub fn port(&self, port_label: &str, default: u16) -> u16 {
        self.label(port_label)
            .and_then(|p| p.trim().parse::<u16>().ok())
            .filter(|p| *p != 0)
            .unwrap_or(default)
    }
}

/// Bounded container operations.
///
/// `inspect` reports a missing container as [`ContainerError::NotFound`];
/// every other failure is a runtime or timeout error.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container, returning its identifier.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

    /// Inspect a container.
    async fn inspect(&self, id: &str) -> Result<ContainerStatus, ContainerError>;

    /// Stop a running container.
    async fn stop(&self, id: &str) -> Result<(), ContainerError>;

    /// Remove a container.
    async fn remove(&self, id: &str) -> Result<(), ContainerError>;

    /// Running containers carrying label `key`, optionally with value `value`.
    async fn list_by_label(
        &self,
        key: &str,
        value: Option<&str>,
    ) -> Result<Vec<ContainerStatus>, ContainerError>;

    /// Last `tail` lines of the container's output.
    async fn logs(&self, id: &str, tail: usize) -> Result<String, ContainerError>;
}

/// Wraps a runtime so every call is cut off at its configured deadline.
pub struct DeadlineRuntime {
    inner: Arc<dyn ContainerRuntime>,
    config: ContainerRuntimeConfig,
}

impl DeadlineRuntime {
    pub fn new(inner: Arc<dyn ContainerRuntime>, config: ContainerRuntimeConfig) -> Self {
        Self { inner, config }
    }
}

async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, ContainerError>
where
    F: Future<Output = Result<T, ContainerError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ContainerError::Timeout {
            operation,
            duration_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        })?
}

#[async_trait]
impl ContainerRuntime for DeadlineRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        bounded("create", self.config.create_timeout(), self.inner.create(spec)).await
    }

    async fn inspect(&self, id: &str) -> Result<ContainerStatus, ContainerError> {
        bounded("inspect", self.config.inspect_timeout(), self.inner.inspect(id)).await
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        bounded("stop", self.config.stop_timeout(), self.inner.stop(id)).await
    }

    async fn remove(&self, id: &str) -> Result<(), ContainerError> {
        bounded("remove", self.config.remove_timeout(), self.inner.remove(id)).await
    }

    async fn list_by_label(
        &self,
        key: &str,
        value: Option<&str>,
    ) -> Result<Vec<ContainerStatus>, ContainerError> {
        bounded(
            "list",
            self.config.list_timeout(),
            self.inner.list_by_label(key, value),
        )
        .await
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String, ContainerError> {
        bounded("logs", self.config.logs_timeout(), self.inner.logs(id, tail)).await
    }
}
