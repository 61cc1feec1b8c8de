//! Function lifecycle management.
//!
//! The [`LifecycleManager`] owns the per-function state machine:
//!
//! ```text
//!  register ──▶ Stopped ──start──▶ Starting ──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                  ▲                   │            │
//!                  └──── launch failed ┘            └── container gone (reconcile)
//! ```
//!
//! Start, stop, cold start and delete for one (tenant, name) are serialized
//! by [`KeyedLocks`]. Recorded state is never trusted blindly: before a
//! record is reported or invoked it is reconciled against the container
//! runtime, and the record is corrected in whichever direction it drifted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use faas_plane_common::{
    ContainerRuntimeConfig, DiscoveryConfig, LifecycleConfig, PlatformConfig, PlatformError,
};

use crate::forward::{Forwarder, InvocationRequest, InvocationResponse, RouteTarget};
use crate::function::{
    ContainerBinding, FunctionKey, FunctionRecord, FunctionSpec, FunctionState, FunctionView,
    namespace_image, validate_name,
};
use crate::lock::KeyedLocks;
use crate::readiness::{Readiness, wait_until_ready};
use crate::registry::{INVOKE_LOOKUP, MANAGE_LOOKUP, RegistryStore};
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerStatus};

/// Label marking containers launched by the platform.
pub const MANAGED_LABEL: &str = "platform.managed";

/// Default number of log lines returned.
pub const DEFAULT_LOG_LINES: usize = 100;

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A container was created or adopted.
    Started { container_id: String },
    /// The function was already running; nothing was created.
    AlreadyRunning { container_id: String },
}

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The bound container was stopped and removed.
    Stopped { container_id: String },
    /// No container was bound.
    NotRunning,
}

/// Recent output of a function's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionLogs {
    pub container_id: String,
    pub logs: String,
    pub running: bool,
}

/// Coordinates the registry, the container runtime and the forwarder.
pub struct LifecycleManager {
    registry: RegistryStore,
    runtime: Arc<dyn ContainerRuntime>,
    forwarder: Arc<dyn Forwarder>,
    locks: KeyedLocks,
    discovery: DiscoveryConfig,
    containers: ContainerRuntimeConfig,
    lifecycle: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        registry: RegistryStore,
        runtime: Arc<dyn ContainerRuntime>,
        forwarder: Arc<dyn Forwarder>,
        config: &PlatformConfig,
    ) -> Self {
        Self {
            registry,
            runtime,
            forwarder,
            locks: KeyedLocks::new(),
            discovery: config.discovery.clone(),
            containers: config.runtime.clone(),
            lifecycle: config.lifecycle.clone(),
        }
    }

    /// The backing registry.
    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    /// Register or update a function owned by `owner`.
    ///
    /// The image is rewritten into the owner's namespace. Re-registering
    /// keeps the current container binding.
    #[instrument(skip(self, spec), fields(function = %spec.name))]
    pub async fn register(
        &self,
        owner: Option<&str>,
        spec: FunctionSpec,
    ) -> Result<FunctionRecord, PlatformError> {
        let owner = owner
            .filter(|o| !o.is_empty())
            .ok_or_else(|| PlatformError::validation("User ID is required"))?;
        validate_name(&spec.name)?;
        if spec.image.trim().is_empty() {
            return Err(PlatformError::validation("Image is required"));
        }

        let image = namespace_image(&self.lifecycle.registry_prefix, owner, spec.image.trim());
        let mut record = FunctionRecord::new(spec.name, image, spec.env, Some(owner.to_string()));
        let key = record.key();

        let _guard = self.locks.acquire(&key).await;
        if let Ok(existing) = self.registry.get(&key) {
            record.state = existing.state;
            record.binding = existing.binding;
        }

        info!(tenant = %owner, image = %record.image, "Registered function");
        self.registry.put(record.clone());
        Ok(record)
    }

    /// Start a function's container.
    ///
    /// A running container labelled for this function is adopted instead
    /// of creating a second one. Launch failures leave the function
    /// stopped and are not retried.
    #[instrument(skip(self))]
    pub async fn start(&self, tenant: &str, name: &str) -> Result<StartOutcome, PlatformError> {
        let record = self.find_managed(tenant, name)?;
        let key = record.key();

        let _guard = self.locks.acquire(&key).await;
        let record = self.reconcile(self.registry.get(&key)?).await?;

        if let Some(binding) = record.binding.as_ref().filter(|_| record.is_running()) {
            info!(container = %binding.container_id, "Function already running");
            return Ok(StartOutcome::AlreadyRunning {
                container_id: binding.container_id.clone(),
            });
        }

        let binding = self.launch(&record).await?;
        Ok(StartOutcome::Started {
            container_id: binding.container_id,
        })
    }

    /// Stop and remove a function's container.
    #[instrument(skip(self))]
    pub async fn stop(&self, tenant: &str, name: &str) -> Result<StopOutcome, PlatformError> {
        let record = self.find_managed(tenant, name)?;
        let key = record.key();

        let _guard = self.locks.acquire(&key).await;
        let record = self.registry.get(&key)?;

        Ok(match self.stop_locked(&record).await? {
            Some(container_id) => StopOutcome::Stopped { container_id },
            None => StopOutcome::NotRunning,
        })
    }

    /// Delete a function, stopping its container first.
    ///
    /// A failing stop is logged and the record is removed anyway.
    #[instrument(skip(self))]
    pub async fn delete(&self, tenant: &str, name: &str) -> Result<(), PlatformError> {
        let record = self.find_managed(tenant, name)?;
        let key = record.key();

        let guard = self.locks.acquire(&key).await;
        let record = self.registry.get(&key)?;

        if let Err(e) = self.stop_locked(&record).await {
            warn!(function = %key, error = %e, "Failed to stop container during delete");
        }

        self.registry.delete(&key);
        drop(guard);
        self.locks.prune(&key);
        info!(function = %key, "Deleted function");
        Ok(())
    }

    /// Invoke a function, cold-starting it if needed.
    ///
    /// `caller` is `None` only for legacy callers that carry no tenant.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn invoke(
        &self,
        caller: Option<&str>,
        name: &str,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, PlatformError> {
        let record = self.registry.resolve(caller, name, INVOKE_LOOKUP)?;
        record.check_owner(caller)?;

        let binding = self.ensure_running(&record).await?;
        debug!(container = %binding.container_id, address = %binding.authority(), "Forwarding invocation");

        let target = RouteTarget::scoped(name, record.tenant());
        match self.forwarder.forward(&target, request).await {
            Err(e) if e.is_upstream_failure() => {
                warn!(function = %record.key(), container = %binding.container_id, error = %e, "Function container unreachable");
                // The container may have died after the health check.
                if let Ok(current) = self.registry.get(&record.key()) {
                    if let Err(e) = self.reconcile(current).await {
                        debug!(error = %e, "Reconcile after upstream failure failed");
                    }
                }
                Err(e)
            }
            result => result,
        }
    }

    /// Functions visible to `caller`: its own plus unowned ones.
    ///
    /// Every record is reconciled against the runtime first. When an owned
    /// and an unowned function share a name, the owned one is reported.
    pub async fn list(&self, caller: Option<&str>) -> BTreeMap<String, FunctionView> {
        let records = self
            .registry
            .list()
            .into_iter()
            .filter(|r| r.owner.is_none() || r.owner.as_deref() == caller)
            .collect();
        self.views(records).await
    }

    /// Functions owned by exactly `tenant`.
    pub async fn list_owned(&self, tenant: &str) -> BTreeMap<String, FunctionView> {
        let records = self
            .registry
            .list()
            .into_iter()
            .filter(|r| r.owner.as_deref() == Some(tenant))
            .collect();
        self.views(records).await
    }

    /// Last `lines` lines of a function's container output.
    pub async fn logs(
        &self,
        caller: Option<&str>,
        name: &str,
        lines: usize,
    ) -> Result<FunctionLogs, PlatformError> {
        let record = self.registry.resolve(caller, name, INVOKE_LOOKUP)?;
        record.check_owner(caller)?;

        let record = self.reconcile(record).await?;
        let binding = record
            .binding
            .as_ref()
            .ok_or_else(|| PlatformError::NotRunning {
                name: name.to_string(),
            })?;

        let logs = self.runtime.logs(&binding.container_id, lines).await?;
        Ok(FunctionLogs {
            container_id: binding.container_id.clone(),
            logs,
            running: record.is_running(),
        })
    }

    fn find_managed(&self, tenant: &str, name: &str) -> Result<FunctionRecord, PlatformError> {
        let record = self.registry.resolve(Some(tenant), name, MANAGE_LOOKUP)?;
        record.check_owner(Some(tenant))?;
        Ok(record)
    }

    /// Return a live binding for `record`, starting a container if needed.
    async fn ensure_running(
        &self,
        record: &FunctionRecord,
    ) -> Result<ContainerBinding, PlatformError> {
        // Fast path: no lock, one inspect.
        if let Some(binding) = record.binding.as_ref().filter(|_| record.is_running()) {
            match self.runtime.inspect(&binding.container_id).await {
                Ok(status) if status.running => return Ok(binding.clone()),
                Ok(_) => debug!(container = %binding.container_id, "Recorded container not running"),
                Err(e) => debug!(container = %binding.container_id, error = %e, "Recorded container inspect failed"),
            }
        }

        let key = record.key();
        let _guard = self.locks.acquire(&key).await;
        let record = self.registry.get(&key)?;
        let record = self
            .reconcile(record)
            .await
            .map_err(|e| PlatformError::unavailable(format!("cannot verify container: {e}")))?;

        if let Some(binding) = record.binding.as_ref().filter(|_| record.is_running()) {
            // Started by a concurrent invocation while we waited.
            return Ok(binding.clone());
        }

        let started = Instant::now();
        let binding = self
            .launch(&record)
            .await
            .map_err(|e| PlatformError::unavailable(format!("failed to start function: {e}")))?;

        match wait_until_ready(self.runtime.as_ref(), &binding, &self.lifecycle.readiness).await {
            Ok(readiness) => {
                info!(
                    function = %key,
                    container = %binding.container_id,
                    ready = readiness == Readiness::Ready,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Cold start complete"
                );
                Ok(binding)
            }
            Err(e) => {
                warn!(function = %key, container = %binding.container_id, error = %e, "Container failed readiness, discarding");
                self.clear_binding(&key, &binding.container_id);
                self.discard(&binding.container_id).await;
                Err(e)
            }
        }
    }

    /// Bring the record's binding in line with the runtime.
    ///
    /// A binding whose container has exited or vanished is cleared (an
    /// exited container is also removed). Inspect failures other than
    /// "not found" are returned so callers can decide.
    async fn reconcile(&self, record: FunctionRecord) -> Result<FunctionRecord, PlatformError> {
        let Some(binding) = record.binding.clone() else {
            return Ok(record);
        };
        let key = record.key();

        match self.runtime.inspect(&binding.container_id).await {
            Ok(status) if status.running => Ok(record),
            Ok(_) => {
                warn!(
                    function = %key,
                    container = %binding.container_id,
                    "Recorded container has exited, marking function stopped"
                );
                let updated = self.clear_binding(&key, &binding.container_id);
                if let Err(e) = self.runtime.remove(&binding.container_id).await {
                    debug!(container = %binding.container_id, error = %e, "Failed to remove exited container");
                }
                Ok(updated.unwrap_or_else(|| stopped(record)))
            }
            Err(e) if e.is_not_found() => {
                warn!(
                    function = %key,
                    container = %binding.container_id,
                    "Recorded container no longer exists, marking function stopped"
                );
                let updated = self.clear_binding(&key, &binding.container_id);
                Ok(updated.unwrap_or_else(|| stopped(record)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Clear the binding only if it still points at `container_id`.
    fn clear_binding(&self, key: &FunctionKey, container_id: &str) -> Option<FunctionRecord> {
        self.registry.update_ephemeral(key, |r| {
            if r.binding.as_ref().is_some_and(|b| b.container_id == container_id) {
                r.binding = None;
                r.state = FunctionState::Stopped;
            }
        })
    }

    /// Create (or adopt) a container and bind it. Caller holds the key lock.
    async fn launch(&self, record: &FunctionRecord) -> Result<ContainerBinding, PlatformError> {
        let key = record.key();
        self.registry
            .update_ephemeral(&key, |r| r.state = FunctionState::Starting);

        match self.adopt_or_create(record).await {
            Ok(binding) => {
                self.registry.update_ephemeral(&key, |r| {
                    r.state = FunctionState::Running;
                    r.binding = Some(binding.clone());
                });
                info!(
                    function = %key,
                    container = %binding.container_id,
                    address = %binding.authority(),
                    "Function running"
                );
                Ok(binding)
            }
            Err(e) => {
                self.registry.update_ephemeral(&key, |r| {
                    r.state = FunctionState::Stopped;
                    r.binding = None;
                });
                warn!(function = %key, error = %e, "Failed to launch container");
                Err(e)
            }
        }
    }

    async fn adopt_or_create(
        &self,
        record: &FunctionRecord,
    ) -> Result<ContainerBinding, PlatformError> {
        match self
            .runtime
            .list_by_label(&self.discovery.launch_label, Some(&record.name))
            .await
        {
            Ok(live) => {
                if let Some(binding) = self.find_live(record, &live) {
                    info!(container = %binding.container_id, "Adopting running container");
                    return Ok(binding);
                }
            }
            Err(e) => debug!(error = %e, "Container listing failed, creating a new container"),
        }

        let spec = self.container_spec(record);
        let id = self.runtime.create(&spec).await?;

        let status = match self.runtime.inspect(&id).await {
            Ok(status) => status,
            Err(e) => {
                self.discard(&id).await;
                return Err(e.into());
            }
        };

        let address = match status.address.clone() {
            Some(address) if status.running => address,
            _ => {
                self.discard(&id).await;
                return Err(PlatformError::unavailable(format!(
                    "container {id} is not running on network {}",
                    self.containers.network
                )));
            }
        };

        Ok(ContainerBinding {
            container_id: id,
            address,
            port: status.port(&self.discovery.port_label, self.discovery.default_port),
        })
    }

    /// Most recently created live container labelled for `record`.
    fn find_live(
        &self,
        record: &FunctionRecord,
        candidates: &[ContainerStatus],
    ) -> Option<ContainerBinding> {
        candidates
            .iter()
            .filter(|c| c.running)
            .filter(|c| c.label(&self.discovery.launch_label) == Some(record.name.as_str()))
            .filter(|c| c.label(&self.discovery.tenant_label).unwrap_or_default() == record.tenant())
            .max_by_key(|c| c.created)
            .and_then(|c| {
                Some(ContainerBinding {
                    container_id: c.id.clone(),
                    address: c.address.clone()?,
                    port: c.port(&self.discovery.port_label, self.discovery.default_port),
                })
            })
    }

    fn container_spec(&self, record: &FunctionRecord) -> ContainerSpec {
        let mut labels = HashMap::from([
            (self.discovery.launch_label.clone(), record.name.clone()),
            (
                self.discovery.port_label.clone(),
                self.discovery.default_port.to_string(),
            ),
            (MANAGED_LABEL.to_string(), "true".to_string()),
        ]);
        if let Some(owner) = &record.owner {
            labels.insert(self.discovery.tenant_label.clone(), owner.clone());
        }

        let suffix = Uuid::new_v4().simple().to_string();
        ContainerSpec {
            name: format!("{}-{}", record.name, &suffix[..8]),
            image: record.image.clone(),
            env: record.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            labels,
            network: self.containers.network.clone(),
            restart_policy: self.containers.restart_policy.clone(),
        }
    }

    /// Stop and remove the bound container. Caller holds the key lock.
    ///
    /// Returns the stopped container id, or `None` if nothing was bound.
    async fn stop_locked(&self, record: &FunctionRecord) -> Result<Option<String>, PlatformError> {
        let Some(binding) = record.binding.clone() else {
            return Ok(None);
        };
        let key = record.key();
        let id = binding.container_id.as_str();

        self.registry
            .update_ephemeral(&key, |r| r.state = FunctionState::Stopping);

        match self.runtime.stop(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(container = %id, "Container already gone");
            }
            Err(e) => {
                self.registry
                    .update_ephemeral(&key, |r| r.state = FunctionState::Running);
                return Err(e.into());
            }
        }

        match self.runtime.remove(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(container = %id, error = %e, "Failed to remove stopped container"),
        }

        self.registry.update_ephemeral(&key, |r| {
            r.state = FunctionState::Stopped;
            r.binding = None;
        });
        self.forwarder
            .invalidate(&RouteTarget::scoped(&record.name, record.tenant()));
        info!(function = %key, container = %id, "Function stopped");
        Ok(Some(binding.container_id))
    }

    /// Best-effort teardown of a container that failed to come up.
    async fn discard(&self, id: &str) {
        if let Err(e) = self.runtime.stop(id).await {
            debug!(container = %id, error = %e, "Failed to stop discarded container");
        }
        if let Err(e) = self.runtime.remove(id).await {
            warn!(container = %id, error = %e, "Failed to remove discarded container");
        }
    }

    async fn views(&self, records: Vec<FunctionRecord>) -> BTreeMap<String, FunctionView> {
        let live = match self
            .runtime
            .list_by_label(&self.discovery.launch_label, None)
            .await
        {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "Failed to list containers, skipping adoption");
                Vec::new()
            }
        };

        let refreshed = join_all(records.into_iter().map(|r| self.refresh(r, &live))).await;

        let mut views = BTreeMap::new();
        let (unowned, owned): (Vec<_>, Vec<_>) =
            refreshed.into_iter().partition(|r| r.owner.is_none());
        for record in unowned.iter().chain(owned.iter()) {
            views.insert(record.name.clone(), FunctionView::from(record));
        }
        views
    }

    /// Reconcile one record for listing.
    ///
    /// A stopped record whose container is still live (for example after a
    /// controller restart) is re-bound to it.
    async fn refresh(&self, record: FunctionRecord, live: &[ContainerStatus]) -> FunctionRecord {
        if record.binding.is_some() {
            return match self.reconcile(record.clone()).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(function = %record.key(), error = %e, "Failed to reconcile function");
                    record
                }
            };
        }

        if record.state != FunctionState::Stopped {
            return record;
        }

        let Some(binding) = self.find_live(&record, live) else {
            return record;
        };

        let key = record.key();
        info!(function = %key, container = %binding.container_id, "Found live container for stopped function, marking running");
        self.registry
            .update_ephemeral(&key, |r| {
                if r.binding.is_none() && r.state == FunctionState::Stopped {
                    r.binding = Some(binding.clone());
                    r.state = FunctionState::Running;
                }
            })
            .unwrap_or(record)
    }
}

fn stopped(mut record: FunctionRecord) -> FunctionRecord {
    record.binding = None;
    record.state = FunctionState::Stopped;
    record
}
