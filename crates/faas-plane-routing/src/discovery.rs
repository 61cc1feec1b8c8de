//! Service discovery cache.
//!
//! Resolves a function to the network identity of a live container by
//! asking the runtime for running containers that carry a discovery label
//! equal to the function name. Results are cached per (tenant, name) with
//! no TTL: every hit is re-verified with an inspect before it is trusted,
//! and any failed check evicts the entry.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use faas_plane_common::{DiscoveryConfig, PlatformError};
use faas_plane_core::{ContainerBinding, ContainerRuntime, ContainerStatus, RouteTarget};

/// A container found under one of the discovery labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredFunction {
    /// Function name (the label value).
    pub name: String,
    /// Container identifier.
    pub container: String,
    pub image: String,
    pub running: bool,
    /// Creation time as a Unix timestamp.
    pub created: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

/// Liveness-gated cache of function containers.
pub struct DiscoveryCache {
    runtime: Arc<dyn ContainerRuntime>,
    config: DiscoveryConfig,
    entries: DashMap<RouteTarget, ContainerBinding>,
}

impl DiscoveryCache {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: DiscoveryConfig) -> Self {
        Self {
            runtime,
            config,
            entries: DashMap::new(),
        }
    }

    /// Resolve `target` to a live container.
    pub async fn resolve(&self, target: &RouteTarget) -> Result<ContainerBinding, PlatformError> {
        let cached = self.entries.get(target).map(|entry| entry.value().clone());

        if let Some(binding) = cached {
            match self.runtime.inspect(&binding.container_id).await {
                Ok(status) if status.running => return Ok(binding),
                Ok(_) => debug!(target = %target, container = %binding.container_id, "Cached container not running"),
                Err(e) => debug!(target = %target, container = %binding.container_id, error = %e, "Cached container check failed"),
            }
            self.evict(target, &binding.container_id);
        }

        let binding = self.lookup(target).await?;
        debug!(
            target = %target,
            container = %binding.container_id,
            address = %binding.authority(),
            "Discovered function container"
        );
        self.entries.insert(target.clone(), binding.clone());
        Ok(binding)
    }

    /// Query the runtime, trying each discovery label key in order.
    async fn lookup(&self, target: &RouteTarget) -> Result<ContainerBinding, PlatformError> {
        let mut last_error = None;

        for key in &self.config.label_keys {
            let candidates = match self.runtime.list_by_label(key, Some(&target.name)).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(label = %key, error = %e, "Container listing failed");
                    last_error = Some(e);
                    continue;
                }
            };

            let newest = candidates
                .into_iter()
                .filter(|c| c.running && c.address.is_some())
                .filter(|c| self.tenant_matches(target, c))
                .max_by_key(|c| c.created);

            if let Some(status) = newest {
                let port = status.port(&self.config.port_label, self.config.default_port);
                if let Some(address) = status.address {
                    return Ok(ContainerBinding {
                        container_id: status.id,
                        address,
                        port,
                    });
                }
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Err(PlatformError::not_found(&target.name)),
        }
    }

    fn tenant_matches(&self, target: &RouteTarget, status: &ContainerStatus) -> bool {
        match target.tenant.as_deref() {
            Some(tenant) => status.label(&self.config.tenant_label).unwrap_or_default() == tenant,
            None => true,
        }
    }

    /// Drop the entry for `target`.
    pub fn invalidate(&self, target: &RouteTarget) {
        if self.entries.remove(target).is_some() {
            debug!(target = %target, "Invalidated discovery entry");
        }
    }

    /// Drop the entry for `target` only if it still points at `container_id`.
    pub fn evict(&self, target: &RouteTarget, container_id: &str) {
        self.entries
            .remove_if(target, |_, binding| binding.container_id == container_id);
    }

    /// Cached binding for `target`, without verification.
    pub fn peek(&self, target: &RouteTarget) -> Option<ContainerBinding> {
        self.entries.get(target).map(|entry| entry.value().clone())
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every running container carrying any discovery label.
    pub async fn discovered(&self) -> Result<Vec<DiscoveredFunction>, PlatformError> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for key in &self.config.label_keys {
            for status in self.runtime.list_by_label(key, None).await? {
                if !seen.insert(status.id.clone()) {
                    continue;
                }
                let Some(name) = status.label(key).map(String::from) else {
                    continue;
                };
                found.push(DiscoveredFunction {
                    name,
                    tenant: status.label(&self.config.tenant_label).map(String::from),
                    container: status.id,
                    image: status.image,
                    running: status.running,
                    created: status.created,
                });
            }
        }

        found.sort_by(|a, b| a.name.cmp(&b.name).then(b.created.cmp(&a.created)));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use faas_plane_core::ContainerSpec;
    use faas_plane_core::testkit::MockRuntime;
    use faas_plane_core::testkit::runtime::labels;

    use super::*;

    fn cache(runtime: &Arc<MockRuntime>) -> DiscoveryCache {
        DiscoveryCache::new(runtime.clone(), DiscoveryConfig::default())
    }

    fn spawn<const N: usize>(runtime: &MockRuntime, pairs: [(&str, &str); N]) -> String {
        runtime.spawn_external(ContainerSpec {
            labels: labels(pairs),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_resolve_and_cache() {
        let runtime = Arc::new(MockRuntime::new());
        let id = spawn(&runtime, [("function", "echo"), ("platform.port", "3000")]);
        let cache = cache(&runtime);
        let target = RouteTarget::new("echo", None);

        let binding = cache.resolve(&target).await.unwrap();
        assert_eq!(binding.container_id, id);
        assert_eq!(binding.address, "127.0.0.1");
        assert_eq!(binding.port, 3000);
        assert_eq!(cache.peek(&target), Some(binding));
    }

    #[tokio::test]
    async fn test_not_found() {
        let runtime = Arc::new(MockRuntime::new());
        let cache = cache(&runtime);

        let err = cache.resolve(&RouteTarget::new("nope", None)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_label_keys_tried_in_order() {
        let runtime = Arc::new(MockRuntime::new());
        let legacy = spawn(&runtime, [("function", "echo")]);
        let current = spawn(&runtime, [("platform.service", "echo")]);
        let cache = cache(&runtime);

        let binding = cache.resolve(&RouteTarget::new("echo", None)).await.unwrap();
        assert_eq!(binding.container_id, current);

        runtime.kill(&current);
        let binding = cache.resolve(&RouteTarget::new("echo", None)).await.unwrap();
        assert_eq!(binding.container_id, legacy);
    }

    #[tokio::test]
    async fn test_default_port_when_label_missing_or_zero() {
        let runtime = Arc::new(MockRuntime::new());
        spawn(&runtime, [("function", "a")]);
        spawn(&runtime, [("function", "b"), ("platform.port", "0")]);
        let cache = cache(&runtime);

        assert_eq!(cache.resolve(&RouteTarget::new("a", None)).await.unwrap().port, 8080);
        assert_eq!(cache.resolve(&RouteTarget::new("b", None)).await.unwrap().port, 8080);
    }

    #[tokio::test]
    async fn test_restart_replaces_cached_identity() {
        let runtime = Arc::new(MockRuntime::new());
        let old = spawn(&runtime, [("function", "echo")]);
        let cache = cache(&runtime);
        let target = RouteTarget::new("echo", None);

        assert_eq!(cache.resolve(&target).await.unwrap().container_id, old);

        // Stop, then start again under the same name.
        runtime.remove_out_of_band(&old);
        let new = spawn(&runtime, [("function", "echo")]);

        assert_eq!(cache.resolve(&target).await.unwrap().container_id, new);
    }

    #[tokio::test]
    async fn test_dead_entry_evicted_when_nothing_replaces_it() {
        let runtime = Arc::new(MockRuntime::new());
        let id = spawn(&runtime, [("function", "echo")]);
        let cache = cache(&runtime);
        let target = RouteTarget::new("echo", None);

        cache.resolve(&target).await.unwrap();
        runtime.kill(&id);

        assert!(cache.resolve(&target).await.unwrap_err().is_not_found());
        assert!(cache.peek(&target).is_none());
    }

    #[tokio::test]
    async fn test_most_recent_duplicate_wins() {
        let runtime = Arc::new(MockRuntime::new());
        spawn(&runtime, [("function", "echo")]);
        let newer = spawn(&runtime, [("function", "echo")]);
        let cache = cache(&runtime);

        let binding = cache.resolve(&RouteTarget::new("echo", None)).await.unwrap();
        assert_eq!(binding.container_id, newer);
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let runtime = Arc::new(MockRuntime::new());
        let a = spawn(&runtime, [("function", "foo"), ("platform.tenant", "a")]);
        let b = spawn(&runtime, [("function", "foo"), ("platform.tenant", "b")]);
        let cache = cache(&runtime);

        let for_a = cache
            .resolve(&RouteTarget::new("foo", Some("a".into())))
            .await
            .unwrap();
        let for_b = cache
            .resolve(&RouteTarget::new("foo", Some("b".into())))
            .await
            .unwrap();
        assert_eq!(for_a.container_id, a);
        assert_eq!(for_b.container_id, b);

        let err = cache
            .resolve(&RouteTarget::new("foo", Some("c".into())))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unowned_scope_skips_tenant_containers() {
        let runtime = Arc::new(MockRuntime::new());
        let unowned = spawn(&runtime, [("function", "foo")]);
        let owned = spawn(&runtime, [("function", "foo"), ("platform.tenant", "a")]);
        let cache = cache(&runtime);

        let binding = cache.resolve(&RouteTarget::scoped("foo", "")).await.unwrap();
        assert_eq!(binding.container_id, unowned);

        // Without any scope the newest container wins.
        let binding = cache.resolve(&RouteTarget::new("foo", None)).await.unwrap();
        assert_eq!(binding.container_id, owned);

        runtime.kill(&unowned);
        let err = cache
            .resolve(&RouteTarget::scoped("foo", ""))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalidate_forces_lookup() {
        let runtime = Arc::new(MockRuntime::new());
        spawn(&runtime, [("function", "echo")]);
        let cache = cache(&runtime);
        let target = RouteTarget::new("echo", None);
        cache.resolve(&target).await.unwrap();

        cache.invalidate(&RouteTarget::new("other", None));
        assert_eq!(cache.len(), 1);

        cache.invalidate(&target);
        assert!(cache.peek(&target).is_none());
    }

    #[tokio::test]
    async fn test_evict_is_conditional() {
        let runtime = Arc::new(MockRuntime::new());
        let id = spawn(&runtime, [("function", "echo")]);
        let cache = cache(&runtime);
        let target = RouteTarget::new("echo", None);
        cache.resolve(&target).await.unwrap();

        cache.evict(&target, "someone-else");
        assert!(cache.peek(&target).is_some());

        cache.evict(&target, &id);
        assert!(cache.peek(&target).is_none());
    }

    #[tokio::test]
    async fn test_discovered_lists_each_container_once() {
        let runtime = Arc::new(MockRuntime::new());
        spawn(&runtime, [("function", "echo"), ("platform.service", "echo")]);
        spawn(&runtime, [("function", "hello"), ("platform.tenant", "t1")]);
        let stopped = spawn(&runtime, [("function", "gone")]);
        runtime.kill(&stopped);
        let cache = cache(&runtime);

        let found = cache.discovered().await.unwrap();
        let names: Vec<_> = found.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "hello"]);
        assert_eq!(found[1].tenant.as_deref(), Some("t1"));
    }
}
