//! Canonical test configurations.

use faas_plane_common::{PlatformConfig, ReadinessConfig, RegistryConfig};

/// Readiness polling that never probes TCP and gives up quickly.
pub fn readiness() -> ReadinessConfig {
    ReadinessConfig {
        settle_delay_ms: 0,
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
        deadline_ms: 200,
        tcp_probe: false,
    }
}

/// Platform configuration with an in-memory registry and fast readiness.
pub fn platform() -> PlatformConfig {
    let mut config = PlatformConfig::default();
    config.registry = RegistryConfig::in_memory();
    config.lifecycle.readiness = readiness();
    config.runtime.network = "test-network".to_string();
    config
}
