//! Registry store for function records.
//!
//! The [`RegistryStore`] keeps every registered function in a concurrent map
//! and mirrors the durable fields to a single JSON snapshot file. Every
//! mutation schedules a background save; saves are serialized and each one
//! snapshots the map under the save lock, so an older snapshot can never
//! land after a newer one.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use faas_plane_common::{PlatformError, RegistryConfig};

use crate::function::{FunctionKey, FunctionRecord, StoredFunction};

/// Strategy used to find a record when the caller's tenant may not match
/// the record's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Exact (tenant, name) match. A missing tenant matches unowned records.
    Composite,
    /// The unowned record with this name.
    Unowned,
    /// Any record with this name regardless of owner.
    AnyOwner,
}

/// Lookup order for invocations.
///
/// A name-only scan follows the exact match so callers still reach
/// functions registered before tenants existed; the ownership check then
/// decides whether the caller may use what was found.
pub const INVOKE_LOOKUP: &[Lookup] = &[Lookup::Composite, Lookup::AnyOwner];

/// Lookup order for start, stop, delete and logs.
pub const MANAGE_LOOKUP: &[Lookup] = &[Lookup::Composite, Lookup::Unowned];

/// Durable, concurrent store of function records.
///
/// Cloning is cheap; all clones share the same map and snapshot file.
#[derive(Clone)]
pub struct RegistryStore {
    inner: Arc<Inner>,
}

struct Inner {
    records: DashMap<FunctionKey, FunctionRecord>,
    path: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl RegistryStore {
    /// Create a store that is never persisted.
    pub fn in_memory() -> Self {
        Self::with_records(None, DashMap::new())
    }

    /// Load the store from the configured snapshot file.
    ///
    /// A missing or unreadable snapshot is logged and the store starts
    /// empty; startup never fails because of the registry file.
    pub fn load(config: &RegistryConfig) -> Self {
        let Some(path) = config.path.clone() else {
            info!("Registry persistence disabled, starting empty");
            return Self::in_memory();
        };

        let records = match read_snapshot(&path) {
            Ok(records) => {
                info!(path = %path.display(), count = records.len(), "Loaded function registry");
                records
            }
            Err(SnapshotError::Missing) => {
                info!(path = %path.display(), "No registry file found, starting empty");
                DashMap::new()
            }
            Err(SnapshotError::Unreadable(reason)) => {
                warn!(path = %path.display(), %reason, "Failed to load registry, starting empty");
                DashMap::new()
            }
        };

        Self::with_records(Some(path), records)
    }

    fn with_records(path: Option<PathBuf>, records: DashMap<FunctionKey, FunctionRecord>) -> Self {
        Self {
            inner: Arc::new(Inner {
                records,
                path,
                save_lock: Mutex::new(()),
            }),
        }
    }

    /// Get a record by composite key.
    pub fn get(&self, key: &FunctionKey) -> Result<FunctionRecord, PlatformError> {
        self.inner
            .records
            .get(key)
            .map(|r| r.value().clone())
            .ok_or_else(|| PlatformError::not_found(&key.name))
    }

    /// Insert or overwrite a record and schedule a save.
    pub fn put(&self, record: FunctionRecord) {
        self.inner.records.insert(record.key(), record);
        self.schedule_persist();
    }

    /// Mutate the ephemeral fields of a record in place.
    ///
    /// Nothing is persisted. Returns the updated record, or `None` if the
    /// key is not registered.
    pub fn update_ephemeral<F>(&self, key: &FunctionKey, update: F) -> Option<FunctionRecord>
    where
        F: FnOnce(&mut FunctionRecord),
    {
        let mut entry = self.inner.records.get_mut(key)?;
        update(entry.value_mut());
        Some(entry.value().clone())
    }

    /// Remove a record and schedule a save.
    pub fn delete(&self, key: &FunctionKey) -> Option<FunctionRecord> {
        let removed = self.inner.records.remove(key).map(|(_, record)| record);
        if removed.is_some() {
            self.schedule_persist();
        }
        removed
    }

    /// Find a record by trying each lookup strategy in order.
    pub fn resolve(
        &self,
        tenant: Option<&str>,
        name: &str,
        strategies: &[Lookup],
    ) -> Result<FunctionRecord, PlatformError> {
        for strategy in strategies {
            let found = match strategy {
                Lookup::Composite => self.get(&FunctionKey::new(tenant.unwrap_or_default(), name)).ok(),
                Lookup::Unowned => self.get(&FunctionKey::unowned(name)).ok(),
                Lookup::AnyOwner => self.find_by_name(name),
            };

            if let Some(record) = found {
                if *strategy != Lookup::Composite {
                    debug!(function = %name, tenant = ?tenant, lookup = ?strategy, "Resolved function via fallback lookup");
                }
                return Ok(record);
            }
        }

        Err(PlatformError::not_found(name))
    }

    /// Name-only scan. Unowned records win, then the lowest tenant.
    fn find_by_name(&self, name: &str) -> Option<FunctionRecord> {
        self.inner
            .records
            .iter()
            .filter(|entry| entry.key().name == name)
            .min_by(|a, b| a.key().tenant.cmp(&b.key().tenant))
            .map(|entry| entry.value().clone())
    }

    /// Snapshot of every record, ordered by key.
    pub fn list(&self) -> Vec<FunctionRecord> {
        let mut records: Vec<FunctionRecord> = self
            .inner
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(FunctionRecord::key);
        records
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// Snapshot file path, if persistence is enabled.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Save the registry and wait for the write to finish.
    pub async fn persist_now(&self) -> Result<(), PlatformError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.save())
            .await
            .map_err(|e| PlatformError::internal(format!("Registry save task failed: {e}")))?
    }

    fn schedule_persist(&self) {
        if self.inner.path.is_none() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    if let Err(e) = inner.save() {
                        warn!(error = %e, "Failed to persist function registry");
                    }
                });
            }
            Err(_) => {
                if let Err(e) = inner.save() {
                    warn!(error = %e, "Failed to persist function registry");
                }
            }
        }
    }
}

impl Inner {
    fn save(&self) -> Result<(), PlatformError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let _guard = self.save_lock.lock();

        let snapshot: BTreeMap<String, StoredFunction> = self
            .records
            .iter()
            .map(|entry| (entry.key().storage_key(), entry.value().to_stored()))
            .collect();

        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| PlatformError::internal(format!("Failed to encode registry: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        debug!(path = %path.display(), count = snapshot.len(), "Persisted function registry");
        Ok(())
    }
}

enum SnapshotError {
    Missing,
    Unreadable(String),
}

fn read_snapshot(path: &Path) -> Result<DashMap<FunctionKey, FunctionRecord>, SnapshotError> {
    let content = std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => SnapshotError::Missing,
        _ => SnapshotError::Unreadable(e.to_string()),
    })?;

    let stored: HashMap<String, StoredFunction> =
        serde_json::from_slice(&content).map_err(|e| SnapshotError::Unreadable(e.to_string()))?;

    // The object key is informational; the composite key comes from the fields.
    Ok(stored
        .into_values()
        .filter(|s| !s.name.is_empty())
        .map(|s| {
            let record = FunctionRecord::from(s);
            (record.key(), record)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{ContainerBinding, FunctionState};

    fn record(tenant: Option<&str>, name: &str) -> FunctionRecord {
        FunctionRecord::new(
            name,
            format!("localhost:5001/{}-{name}:latest", tenant.unwrap_or("x")),
            BTreeMap::new(),
            tenant.map(String::from),
        )
    }

    fn file_config(dir: &tempfile::TempDir) -> RegistryConfig {
        RegistryConfig {
            path: Some(dir.path().join("functions.json")),
        }
    }

    #[test]
    fn test_put_get_delete() {
        let store = RegistryStore::in_memory();
        store.put(record(Some("t1"), "echo"));

        let key = FunctionKey::new("t1", "echo");
        assert_eq!(store.get(&key).unwrap().name, "echo");
        assert!(store.get(&FunctionKey::new("t2", "echo")).unwrap_err().is_not_found());

        assert!(store.delete(&key).is_some());
        assert!(store.delete(&key).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_resolve_strategies() {
        let store = RegistryStore::in_memory();
        store.put(record(None, "legacy"));
        store.put(record(Some("t2"), "echo"));

        // Exact match only
        assert!(store.resolve(Some("t1"), "echo", &[Lookup::Composite]).is_err());

        // Name-only scan finds another tenant's record
        let found = store.resolve(Some("t1"), "echo", INVOKE_LOOKUP).unwrap();
        assert_eq!(found.owner.as_deref(), Some("t2"));

        // Management falls back to unowned records only
        assert!(store.resolve(Some("t1"), "echo", MANAGE_LOOKUP).is_err());
        let legacy = store.resolve(Some("t1"), "legacy", MANAGE_LOOKUP).unwrap();
        assert!(legacy.owner.is_none());

        // No tenant behaves like the unowned namespace
        assert!(store.resolve(None, "legacy", &[Lookup::Composite]).is_ok());
    }

    #[test]
    fn test_any_owner_prefers_unowned() {
        let store = RegistryStore::in_memory();
        store.put(record(Some("b"), "echo"));
        store.put(record(Some("a"), "echo"));
        store.put(record(None, "echo"));

        let found = store.resolve(None, "echo", &[Lookup::AnyOwner]).unwrap();
        assert!(found.owner.is_none());

        store.delete(&FunctionKey::unowned("echo"));
        let found = store.resolve(None, "echo", &[Lookup::AnyOwner]).unwrap();
        assert_eq!(found.owner.as_deref(), Some("a"));
    }

    #[test]
    fn test_update_ephemeral() {
        let store = RegistryStore::in_memory();
        store.put(record(Some("t1"), "echo"));
        let key = FunctionKey::new("t1", "echo");

        let updated = store
            .update_ephemeral(&key, |r| r.state = FunctionState::Starting)
            .unwrap();
        assert_eq!(updated.state, FunctionState::Starting);
        assert!(store.update_ephemeral(&FunctionKey::new("t1", "nope"), |_| {}).is_none());
    }

    #[tokio::test]
    async fn test_round_trip_excludes_ephemeral_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);

        let store = RegistryStore::load(&config);
        let mut running = record(Some("t1"), "echo");
        running.env.insert("MODE".into(), "fast".into());
        running.state = FunctionState::Running;
        running.binding = Some(ContainerBinding {
            container_id: "c1".into(),
            address: "10.0.0.2".into(),
            port: 8080,
        });
        store.put(running);
        store.put(record(None, "legacy"));
        store.persist_now().await.unwrap();

        let reloaded = RegistryStore::load(&config);
        assert_eq!(reloaded.len(), 2);

        let echo = reloaded.get(&FunctionKey::new("t1", "echo")).unwrap();
        assert_eq!(echo.env.get("MODE").map(String::as_str), Some("fast"));
        assert!(!echo.is_running());
        assert!(echo.binding.is_none());
        assert!(reloaded.get(&FunctionKey::unowned("legacy")).is_ok());
    }

    #[tokio::test]
    async fn test_round_trip_keeps_hyphenated_keys_apart() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);

        let store = RegistryStore::load(&config);
        store.put(record(Some("a"), "b-c"));
        store.put(record(Some("a-b"), "c"));
        store.persist_now().await.unwrap();

        let reloaded = RegistryStore::load(&config);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.get(&FunctionKey::new("a", "b-c")).is_ok());
        assert!(reloaded.get(&FunctionKey::new("a-b", "c")).is_ok());
    }

    #[test]
    fn test_snapshot_format() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);

        // No runtime: the save runs inline
        let store = RegistryStore::load(&config);
        store.put(record(Some("t1"), "echo"));

        let raw = std::fs::read_to_string(config.path.as_ref().unwrap()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &value["t1/echo"];
        assert_eq!(entry["name"], "echo");
        assert_eq!(entry["user_id"], "t1");
        assert!(entry.get("container").is_none());
        assert!(entry.get("running").is_none());
    }

    #[test]
    fn test_load_rebuilds_key_from_fields() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);
        std::fs::write(
            config.path.as_ref().unwrap(),
            r#"{"whatever": {"name": "echo", "image": "img", "user_id": "t1"},
                "legacy": {"name": "old", "image": "img2"}}"#,
        )
        .unwrap();

        let store = RegistryStore::load(&config);
        assert!(store.get(&FunctionKey::new("t1", "echo")).is_ok());
        assert!(store.get(&FunctionKey::unowned("old")).is_ok());
    }

    #[test]
    fn test_missing_or_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);
        assert!(RegistryStore::load(&config).is_empty());

        std::fs::write(config.path.as_ref().unwrap(), "{not json").unwrap();
        assert!(RegistryStore::load(&config).is_empty());
    }
}
