//! Configuration structures for faas-plane.
//!
//! This module defines configuration options for the control plane:
//! - [`PlatformConfig`]: Top-level configuration containing all settings
//! - [`ContainerRuntimeConfig`]: Container runtime connection and call deadlines
//! - [`DiscoveryConfig`]: Label conventions shared by launcher and discovery
//! - [`LifecycleConfig`]: Registration and cold-start behaviour
//! - [`ProxyConfig`]: Outbound forwarding settings
//! - [`RegistryConfig`]: Durable registry location

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level platform configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlatformConfig {
    /// Container runtime settings.
    #[serde(default)]
    pub runtime: ContainerRuntimeConfig,

    /// Discovery label conventions.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Lifecycle manager settings.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Routing proxy settings.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Registry persistence settings.
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Container runtime configuration.
///
/// Every runtime call is bounded so a slow daemon only blocks the
/// invocation that triggered it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerRuntimeConfig {
    /// Docker daemon address (`unix://...`, `tcp://...`).
    ///
    /// Local defaults (`DOCKER_HOST` or the default socket) are used when unset.
    #[serde(default)]
    pub docker_host: Option<String>,

    /// Internal compute network every function container joins.
    #[serde(default = "defaults::network")]
    pub network: String,

    /// Restart policy applied to function containers.
    #[serde(default = "defaults::restart_policy")]
    pub restart_policy: String,

    /// Grace period in seconds given to a container on stop.
    #[serde(default = "defaults::stop_grace_secs")]
    pub stop_grace_secs: i32,

    /// Timeout for inspect calls in milliseconds.
    #[serde(default = "defaults::inspect_timeout_ms")]
    pub inspect_timeout_ms: u64,

    /// Timeout for create (create + start) calls in milliseconds.
    #[serde(default = "defaults::create_timeout_ms")]
    pub create_timeout_ms: u64,

    /// Timeout for stop calls in milliseconds.
    #[serde(default = "defaults::stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Timeout for remove calls in milliseconds.
    #[serde(default = "defaults::remove_timeout_ms")]
    pub remove_timeout_ms: u64,

    /// Timeout for list-by-label calls in milliseconds.
    #[serde(default = "defaults::list_timeout_ms")]
    pub list_timeout_ms: u64,

    /// Timeout for log retrieval in milliseconds.
    #[serde(default = "defaults::logs_timeout_ms")]
    pub logs_timeout_ms: u64,
}

impl Default for ContainerRuntimeConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            network: defaults::network(),
            restart_policy: defaults::restart_policy(),
            stop_grace_secs: defaults::stop_grace_secs(),
            inspect_timeout_ms: defaults::inspect_timeout_ms(),
            create_timeout_ms: defaults::create_timeout_ms(),
            stop_timeout_ms: defaults::stop_timeout_ms(),
            remove_timeout_ms: defaults::remove_timeout_ms(),
            list_timeout_ms: defaults::list_timeout_ms(),
            logs_timeout_ms: defaults::logs_timeout_ms(),
        }
    }
}

impl ContainerRuntimeConfig {
    /// Get the inspect timeout as a `Duration`.
    pub fn inspect_timeout(&self) -> Duration {
        Duration::from_millis(self.inspect_timeout_ms)
    }

    /// Get the create timeout as a `Duration`.
    pub fn create_timeout(&self) -> Duration {
        Duration::from_millis(self.create_timeout_ms)
    }

    /// Get the stop timeout as a `Duration`.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Get the remove timeout as a `Duration`.
    pub fn remove_timeout(&self) -> Duration {
        Duration::from_millis(self.remove_timeout_ms)
    }

    /// Get the list timeout as a `Duration`.
    pub fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }

    /// Get the logs timeout as a `Duration`.
    pub fn logs_timeout(&self) -> Duration {
        Duration::from_millis(self.logs_timeout_ms)
    }
}

/// Label conventions shared by the lifecycle manager and the discovery cache.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Label keys tried in order when discovering a function's container.
    ///
    /// Several keys are supported so containers labelled under an older
    /// convention remain routable.
    #[serde(default = "defaults::label_keys")]
    pub label_keys: Vec<String>,

    /// Label key the lifecycle manager writes the function name under.
    #[serde(default = "defaults::launch_label")]
    pub launch_label: String,

    /// Label carrying the port the container listens on.
    #[serde(default = "defaults::port_label")]
    pub port_label: String,

    /// Label carrying the owning tenant.
    #[serde(default = "defaults::tenant_label")]
    pub tenant_label: String,

    /// Port assumed when a container declares none.
    #[serde(default = "defaults::default_port")]
    pub default_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            label_keys: defaults::label_keys(),
            launch_label: defaults::launch_label(),
            port_label: defaults::port_label(),
            tenant_label: defaults::tenant_label(),
            default_port: defaults::default_port(),
        }
    }
}

/// Lifecycle manager configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Registry host that tenant-namespaced images are rewritten under.
    #[serde(default = "defaults::registry_prefix")]
    pub registry_prefix: String,

    /// Cold-start readiness polling.
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            registry_prefix: defaults::registry_prefix(),
            readiness: ReadinessConfig::default(),
        }
    }
}

/// Cold-start readiness polling configuration.
///
/// After a container is created the lifecycle manager polls it with
/// exponential backoff until it accepts TCP connections or the deadline
/// passes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadinessConfig {
    /// Fixed delay applied before the first probe, in milliseconds.
    #[serde(default)]
    pub settle_delay_ms: u64,

    /// First backoff interval in milliseconds.
    #[serde(default = "defaults::initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the backoff interval in milliseconds.
    #[serde(default = "defaults::max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Overall deadline for the poll in milliseconds.
    #[serde(default = "defaults::readiness_deadline_ms")]
    pub deadline_ms: u64,

    /// Probe the container port with a TCP connect.
    ///
    /// Requires the controller to be attached to the compute network.
    #[serde(default = "defaults::tcp_probe")]
    pub tcp_probe: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 0,
            initial_backoff_ms: defaults::initial_backoff_ms(),
            max_backoff_ms: defaults::max_backoff_ms(),
            deadline_ms: defaults::readiness_deadline_ms(),
            tcp_probe: defaults::tcp_probe(),
        }
    }
}

impl ReadinessConfig {
    /// Get the overall deadline as a `Duration`.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// How the lifecycle manager hands invocations to the routing proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// Call the routing proxy in-process.
    #[default]
    Embedded,
    /// Call a routing proxy running as a separate service over HTTP.
    Remote,
}

/// Routing proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// How invocations reach the proxy.
    #[serde(default)]
    pub mode: ForwardMode,

    /// Base URL of a remote routing proxy.
    #[serde(default = "defaults::remote_url")]
    pub remote_url: String,

    /// Timeout for calls to a remote routing proxy in milliseconds.
    #[serde(default = "defaults::remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// Timeout for calls to function containers in milliseconds.
    #[serde(default = "defaults::upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Dial timeout for function containers in milliseconds.
    #[serde(default = "defaults::connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle connections kept per container.
    #[serde(default = "defaults::pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mode: ForwardMode::default(),
            remote_url: defaults::remote_url(),
            remote_timeout_ms: defaults::remote_timeout_ms(),
            upstream_timeout_ms: defaults::upstream_timeout_ms(),
            connect_timeout_ms: defaults::connect_timeout_ms(),
            pool_max_idle_per_host: defaults::pool_max_idle_per_host(),
        }
    }
}

impl ProxyConfig {
    /// Get the upstream timeout as a `Duration`.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Get the connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the remote proxy timeout as a `Duration`.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

/// Registry persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Snapshot file. The registry is memory-only when unset.
    #[serde(default = "defaults::registry_path")]
    pub path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: defaults::registry_path(),
        }
    }
}

impl RegistryConfig {
    /// A registry that is never persisted.
    pub fn in_memory() -> Self {
        Self { path: None }
    }
}

/// Default value functions for serde.
mod defaults {
    use std::path::PathBuf;

    pub fn network() -> String {
        "platform-repository_function-network".to_string()
    }

    pub fn restart_policy() -> String {
        "unless-stopped".to_string()
    }

    pub const fn stop_grace_secs() -> i32 {
        10
    }

    pub const fn inspect_timeout_ms() -> u64 {
        5_000
    }

    pub const fn create_timeout_ms() -> u64 {
        10_000
    }

    pub const fn stop_timeout_ms() -> u64 {
        15_000
    }

    pub const fn remove_timeout_ms() -> u64 {
        10_000
    }

    pub const fn list_timeout_ms() -> u64 {
        5_000
    }

    pub const fn logs_timeout_ms() -> u64 {
        10_000
    }

    pub fn label_keys() -> Vec<String> {
        vec!["platform.service".to_string(), "function".to_string()]
    }

    pub fn launch_label() -> String {
        "function".to_string()
    }

    pub fn port_label() -> String {
        "platform.port".to_string()
    }

    pub fn tenant_label() -> String {
        "platform.tenant".to_string()
    }

    pub const fn default_port() -> u16 {
        8080
    }

    pub fn registry_prefix() -> String {
        "localhost:5001".to_string()
    }

    pub const fn initial_backoff_ms() -> u64 {
        100
    }

    pub const fn max_backoff_ms() -> u64 {
        1_000
    }

    pub const fn readiness_deadline_ms() -> u64 {
        10_000
    }

    pub const fn tcp_probe() -> bool {
        true
    }

    pub fn remote_url() -> String {
        "http://function-proxy:8090".to_string()
    }

    pub const fn remote_timeout_ms() -> u64 {
        25_000
    }

    pub const fn upstream_timeout_ms() -> u64 {
        20_000
    }

    pub const fn connect_timeout_ms() -> u64 {
        5_000
    }

    pub const fn pool_max_idle_per_host() -> usize {
        32
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn registry_path() -> Option<PathBuf> {
        Some(PathBuf::from("/app/data/functions.json"))
    }
}
