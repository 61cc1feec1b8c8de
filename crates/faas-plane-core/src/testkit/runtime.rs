//! In-memory [`ContainerRuntime`] for testing.
//!
//! Containers are plain map entries. Identifiers are `mock-{n}` and
//! creation timestamps increase with `n`, so "most recently created" is
//! deterministic. Failures can be injected per operation, and containers
//! can be killed, removed or started behind the platform's back to
//! exercise reconciliation.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use faas_plane_common::ContainerError;

use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerStatus};

struct MockContainer {
    spec: ContainerSpec,
    running: bool,
    created: i64,
    logs: Vec<String>,
    /// Inspections left before the container exits on its own.
    exits_after: Option<usize>,
}

#[derive(Default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    seq: u64,
    creates: usize,
    stops: usize,
    fail_create: Option<String>,
    fail_stop: Option<String>,
    fail_remove: Option<String>,
    fail_inspect: Option<String>,
    exit_next: Option<usize>,
}

/// An in-memory container runtime.
pub struct MockRuntime {
    state: Mutex<MockState>,
    address: Mutex<String>,
    create_delay: Mutex<Option<Duration>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Containers report `127.0.0.1` as their network address.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            address: Mutex::new("127.0.0.1".to_string()),
            create_delay: Mutex::new(None),
        }
    }

    /// Set the address reported for running containers.
    pub fn set_address(&self, address: impl Into<String>) {
        *self.address.lock() = address.into();
    }

    /// Delay every create, widening race windows in concurrency tests.
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    /// Containers created through [`ContainerRuntime::create`].
    pub fn create_count(&self) -> usize {
        self.state.lock().creates
    }

    /// Successful stop calls.
    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }

    /// Containers currently running.
    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .containers
            .values()
            .filter(|c| c.running)
            .count()
    }

    /// Containers that exist, running or not.
    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    /// Whether `id` exists and is running.
    pub fn is_running(&self, id: &str) -> bool {
        self.state
            .lock()
            .containers
            .get(id)
            .is_some_and(|c| c.running)
    }

    /// Spec the container was created with.
    pub fn spec_of(&self, id: &str) -> Option<ContainerSpec> {
        self.state.lock().containers.get(id).map(|c| c.spec.clone())
    }

    /// Simulate the container exiting on its own.
    pub fn kill(&self, id: &str) {
        if let Some(c) = self.state.lock().containers.get_mut(id) {
            c.running = false;
        }
    }

    /// Simulate the container being removed by an operator.
    pub fn remove_out_of_band(&self, id: &str) {
        self.state.lock().containers.remove(id);
    }

    /// Start a container outside the platform; not counted as a create.
    pub fn spawn_external(&self, spec: ContainerSpec) -> String {
        let mut state = self.state.lock();
        Self::insert(&mut state, spec)
    }

    /// Append a line to a container's output.
    pub fn push_log(&self, id: &str, line: impl Into<String>) {
        if let Some(c) = self.state.lock().containers.get_mut(id) {
            c.logs.push(line.into());
        }
    }

    pub fn fail_next_create(&self, message: impl Into<String>) {
        self.state.lock().fail_create = Some(message.into());
    }

    pub fn fail_next_stop(&self, message: impl Into<String>) {
        self.state.lock().fail_stop = Some(message.into());
    }

    pub fn fail_next_remove(&self, message: impl Into<String>) {
        self.state.lock().fail_remove = Some(message.into());
    }

    pub fn fail_next_inspect(&self, message: impl Into<String>) {
        self.state.lock().fail_inspect = Some(message.into());
    }

    /// The next created container reports running for `inspections`
    /// inspects, then exits.
    pub fn exit_next_after(&self, inspections: usize) {
        self.state.lock().exit_next = Some(inspections);
    }

    fn insert(state: &mut MockState, spec: ContainerSpec) -> String {
        state.seq += 1;
        let id = format!("mock-{}", state.seq);
        state.containers.insert(
            id.clone(),
            MockContainer {
                spec,
                running: true,
                created: i64::try_from(state.seq).unwrap_or(i64::MAX),
                logs: Vec::new(),
                exits_after: None,
            },
        );
        id
    }

    fn status(&self, id: &str, container: &MockContainer) -> ContainerStatus {
        ContainerStatus {
            id: id.to_string(),
            image: container.spec.image.clone(),
            running: container.running,
            address: container.running.then(|| self.address.lock().clone()),
            labels: container.spec.labels.clone(),
            created: container.created,
        }
    }
}

fn not_found(id: &str) -> ContainerError {
    ContainerError::NotFound {
        container_id: id.to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(message) = state.fail_create.take() {
            return Err(ContainerError::runtime("create", message));
        }
        state.creates += 1;
        let exits_after = state.exit_next.take();
        let id = Self::insert(&mut state, spec.clone());
        if let Some(container) = state.containers.get_mut(&id) {
            container.exits_after = exits_after;
        }
        Ok(id)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerStatus, ContainerError> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_inspect.take() {
            return Err(ContainerError::runtime("inspect", message));
        }
        let container = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        match container.exits_after {
            Some(0) => {
                container.running = false;
                container.exits_after = None;
            }
            Some(left) => container.exits_after = Some(left - 1),
            None => {}
        }
        Ok(self.status(id, container))
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_stop.take() {
            return Err(ContainerError::runtime("stop", message));
        }
        let container = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        container.running = false;
        state.stops += 1;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_remove.take() {
            return Err(ContainerError::runtime("remove", message));
        }
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found(id))
    }

    async fn list_by_label(
        &self,
        key: &str,
        value: Option<&str>,
    ) -> Result<Vec<ContainerStatus>, ContainerError> {
        let state = self.state.lock();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .filter(|(_, c)| match (c.spec.labels.get(key), value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .map(|(id, c)| self.status(id, c))
            .collect())
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String, ContainerError> {
        let state = self.state.lock();
        let container = state.containers.get(id).ok_or_else(|| not_found(id))?;
        let skip = container.logs.len().saturating_sub(tail);
        let mut out = container.logs[skip..].join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        Ok(out)
    }
}

/// Labels helper for [`MockRuntime::spawn_external`].
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
