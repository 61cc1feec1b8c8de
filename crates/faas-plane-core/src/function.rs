//! Function records and their lifecycle state.
//!
//! A [`FunctionRecord`] pairs durable metadata (image, env, owner) with
//! ephemeral state (lifecycle state and container binding). Only the
//! durable half is ever written to disk; see [`StoredFunction`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use faas_plane_common::PlatformError;

/// Composite key identifying a function: (tenant, name).
///
/// Unowned (legacy) records live under the empty tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey {
    /// Owning tenant, empty for unowned records.
    pub tenant: String,
    /// Function name.
    pub name: String,
}

impl FunctionKey {
    /// Create a new key.
    pub fn new(tenant: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            name: name.into(),
        }
    }

    /// Key for an unowned record.
    pub fn unowned(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }

    /// Key used in the registry snapshot file.
    ///
    /// `{tenant}/{name}`, or the bare name when unowned. Names never contain
    /// `/`, so distinct keys never collide.
    pub fn storage_key(&self) -> String {
        if self.tenant.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.tenant, self.name)
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tenant.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.tenant, self.name)
        }
    }
}

/// Lifecycle state of a registered function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionState {
    /// Registered with no container.
    #[default]
    Stopped,
    /// A container is being created.
    Starting,
    /// Bound to a container that was live at the last check.
    Running,
    /// The bound container is being stopped.
    Stopping,
}

impl fmt::Display for FunctionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionState::Stopped => write!(f, "stopped"),
            FunctionState::Starting => write!(f, "starting"),
            FunctionState::Running => write!(f, "running"),
            FunctionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// A container serving a function.
///
/// Replaced wholesale on every start; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBinding {
    /// Runtime container identifier.
    pub container_id: String,
    /// Address on the compute network.
    pub address: String,
    /// Port the function listens on.
    pub port: u16,
}

impl ContainerBinding {
    /// `address:port` of the container.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Registration request for a function.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionSpec {
    /// Function name.
    #[serde(default)]
    pub name: String,
    /// Container image reference.
    #[serde(default)]
    pub image: String,
    /// Environment variables passed to the container.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl FunctionSpec {
    /// Create a spec with no environment.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: BTreeMap::new(),
        }
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A registered function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRecord {
    /// Function name.
    pub name: String,
    /// Tenant-namespaced image reference.
    pub image: String,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Owning tenant; `None` for legacy records.
    pub owner: Option<String>,
    /// Lifecycle state (ephemeral).
    pub state: FunctionState,
    /// Bound container (ephemeral).
    pub binding: Option<ContainerBinding>,
}

impl FunctionRecord {
    /// Create a stopped record.
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        env: BTreeMap<String, String>,
        owner: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env,
            owner,
            state: FunctionState::Stopped,
            binding: None,
        }
    }

    /// Composite key of this record.
    pub fn key(&self) -> FunctionKey {
        FunctionKey::new(self.tenant(), self.name.clone())
    }

    /// Owning tenant, empty for unowned records.
    pub fn tenant(&self) -> &str {
        self.owner.as_deref().unwrap_or_default()
    }

    /// Whether the record is bound to a container believed live.
    pub fn is_running(&self) -> bool {
        self.state == FunctionState::Running && self.binding.is_some()
    }

    /// Check that `caller` may operate on this record.
    ///
    /// Unowned records are open to every caller, and callers without a
    /// tenant are only reachable through the legacy lookup path.
    pub fn check_owner(&self, caller: Option<&str>) -> Result<(), PlatformError> {
        match (caller, self.owner.as_deref()) {
            (Some(caller), Some(owner)) if caller != owner => {
                Err(PlatformError::permission_denied(caller, &self.name))
            }
            _ => Ok(()),
        }
    }

    /// Endpoint on the routing proxy that serves this function.
    pub fn endpoint(&self) -> String {
        format!("/function/{}", self.name)
    }

    /// Durable view of the record.
    pub fn to_stored(&self) -> StoredFunction {
        StoredFunction {
            name: self.name.clone(),
            image: self.image.clone(),
            env: self.env.clone(),
            owner: self.owner.clone(),
        }
    }
}

/// Durable fields of a function as written to the registry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFunction {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl From<StoredFunction> for FunctionRecord {
    fn from(stored: StoredFunction) -> Self {
        let owner = stored.owner.filter(|o| !o.is_empty());
        FunctionRecord::new(stored.name, stored.image, stored.env, owner)
    }
}

/// Function as reported by list endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionView {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    pub running: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl From<&FunctionRecord> for FunctionView {
    fn from(record: &FunctionRecord) -> Self {
        Self {
            name: record.name.clone(),
            image: record.image.clone(),
            container: record.binding.as_ref().map(|b| b.container_id.clone()),
            running: record.is_running(),
            env: record.env.clone(),
            endpoint: record.endpoint(),
            user_id: record.owner.clone(),
        }
    }
}

/// Validate a function name.
///
/// Names become container names and label values, so they are limited to
/// ASCII alphanumerics, `-`, `_` and `.`, and must start with an
/// alphanumeric.
pub fn validate_name(name: &str) -> Result<(), PlatformError> {
    if name.is_empty() {
        return Err(PlatformError::validation("Function name is required"));
    }
    if name.len() > 63 {
        return Err(PlatformError::validation(
            "Function name must be at most 63 characters",
        ));
    }
    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !first_ok || !rest_ok {
        return Err(PlatformError::validation(format!(
            "Invalid function name '{name}'"
        )));
    }
    Ok(())
}

/// Rewrite an image reference into the tenant's namespace.
///
/// The result is `{registry_prefix}/{tenant}-{repo}{tag}` where `repo` is
/// the last path segment of `image` and the tag defaults to `:latest`.
/// References already under the tenant namespace are returned unchanged.
pub fn namespace_image(registry_prefix: &str, tenant: &str, image: &str) -> String {
    let namespace = format!("{registry_prefix}/{tenant}-");
    if image.starts_with(&namespace) {
        return image.to_string();
    }

    let last = image.rsplit('/').next().unwrap_or(image);
    let (repo, reference) = if let Some((repo, digest)) = last.split_once('@') {
        (repo, format!("@{digest}"))
    } else if let Some((repo, tag)) = last.rsplit_once(':') {
        (repo, format!(":{tag}"))
    } else {
        (last, ":latest".to_string())
    };

    format!("{namespace}{repo}{reference}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_image() {
        assert_eq!(
            namespace_image("localhost:5001", "t1", "registry/echo:latest"),
            "localhost:5001/t1-echo:latest"
        );
        assert_eq!(
            namespace_image("localhost:5001", "t1", "echo"),
            "localhost:5001/t1-echo:latest"
        );
        assert_eq!(
            namespace_image("localhost:5001", "t1", "registry:5000/team/echo:v2"),
            "localhost:5001/t1-echo:v2"
        );
        assert_eq!(
            namespace_image("localhost:5001", "t1", "registry/echo@sha256:abc"),
            "localhost:5001/t1-echo@sha256:abc"
        );
    }

    #[test]
    fn test_namespace_image_is_idempotent() {
        let once = namespace_image("localhost:5001", "t1", "registry/echo:latest");
        let twice = namespace_image("localhost:5001", "t1", &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("echo").is_ok());
        assert!(validate_name("echo-v2.1_beta").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-echo").is_err());
        assert!(validate_name("echo/../x").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_check_owner() {
        let owned = FunctionRecord::new("echo", "img", BTreeMap::new(), Some("t1".into()));
        assert!(owned.check_owner(Some("t1")).is_ok());
        assert!(matches!(
            owned.check_owner(Some("t2")),
            Err(PlatformError::PermissionDenied { .. })
        ));
        assert!(owned.check_owner(None).is_ok());

        let legacy = FunctionRecord::new("echo", "img", BTreeMap::new(), None);
        assert!(legacy.check_owner(Some("anyone")).is_ok());
    }

    #[test]
    fn test_stored_round_trip_drops_ephemeral_fields() {
        let mut record = FunctionRecord::new(
            "echo",
            "localhost:5001/t1-echo:latest",
            BTreeMap::from([("MODE".to_string(), "fast".to_string())]),
            Some("t1".into()),
        );
        record.state = FunctionState::Running;
        record.binding = Some(ContainerBinding {
            container_id: "abc".into(),
            address: "10.0.0.2".into(),
            port: 8080,
        });

        let json = serde_json::to_string(&record.to_stored()).unwrap();
        assert!(!json.contains("abc"));
        assert!(json.contains("\"user_id\":\"t1\""));

        let restored: FunctionRecord = serde_json::from_str::<StoredFunction>(&json)
            .unwrap()
            .into();
        assert_eq!(restored.image, record.image);
        assert_eq!(restored.env, record.env);
        assert_eq!(restored.owner, record.owner);
        assert!(!restored.is_running());
        assert!(restored.binding.is_none());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(FunctionKey::new("t1", "echo").to_string(), "t1/echo");
        assert_eq!(FunctionKey::unowned("echo").to_string(), "echo");
        assert_eq!(FunctionKey::new("t1", "echo").storage_key(), "t1/echo");
        assert_eq!(FunctionKey::unowned("echo").storage_key(), "echo");
        assert_ne!(
            FunctionKey::new("a", "b-c").storage_key(),
            FunctionKey::new("a-b", "c").storage_key()
        );
    }
}
