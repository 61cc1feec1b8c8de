//! Configuration file structures for faas-plane.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: HTTP listener settings
//! - [`LoggingConfig`]: Log output settings

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ForwardMode, PlatformConfig};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [server]
/// bind_addr = "0.0.0.0:8081"
/// proxy_bind_addr = "0.0.0.0:8090"
/// request_timeout_secs = 60
/// tenant_header = "X-User-ID"
///
/// [logging]
/// format = "json"
///
/// [runtime]
/// network = "platform-repository_function-network"
///
/// [discovery]
/// label_keys = ["platform.service", "function"]
///
/// [lifecycle]
/// registry_prefix = "localhost:5001"
///
/// [lifecycle.readiness]
/// deadline_ms = 10000
///
/// [proxy]
/// mode = "embedded"
/// upstream_timeout_ms = 20000
///
/// [registry]
/// path = "/app/data/functions.json"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// HTTP listener configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Platform configuration (runtime, discovery, lifecycle, proxy, registry).
    #[serde(flatten)]
    pub platform: PlatformConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-section constraints.
    ///
    /// Outbound deadlines must be shorter than the caller-facing request
    /// timeout so a stuck container surfaces as a gateway timeout.
    pub fn validate(&self) -> Result<(), ConfigFileError> {
        let request_timeout_ms = self.server.request_timeout_secs.saturating_mul(1000);
        let proxy = &self.platform.proxy;

        if proxy.upstream_timeout_ms >= request_timeout_ms {
            return Err(ConfigFileError::Invalid {
                message: format!(
                    "proxy.upstream_timeout_ms ({}) must be less than server.request_timeout_secs ({}s)",
                    proxy.upstream_timeout_ms, self.server.request_timeout_secs
                ),
            });
        }

        if proxy.remote_timeout_ms >= request_timeout_ms {
            return Err(ConfigFileError::Invalid {
                message: format!(
                    "proxy.remote_timeout_ms ({}) must be less than server.request_timeout_secs ({}s)",
                    proxy.remote_timeout_ms, self.server.request_timeout_secs
                ),
            });
        }

        // A cold start creates the container, waits for readiness and then
        // forwards, all inside one request.
        let platform = &self.platform;
        let forward_ms = match proxy.mode {
            ForwardMode::Embedded => proxy.upstream_timeout_ms,
            ForwardMode::Remote => proxy.remote_timeout_ms,
        };
        let cold_start_ms = platform
            .runtime
            .create_timeout_ms
            .saturating_add(platform.lifecycle.readiness.settle_delay_ms)
            .saturating_add(platform.lifecycle.readiness.deadline_ms)
            .saturating_add(forward_ms);
        if cold_start_ms >= request_timeout_ms {
            return Err(ConfigFileError::Invalid {
                message: format!(
                    "cold start budget ({cold_start_ms}ms: runtime.create_timeout_ms + lifecycle.readiness settle and deadline + forward timeout) must be less than server.request_timeout_secs ({}s)",
                    self.server.request_timeout_secs
                ),
            });
        }

        if self.platform.discovery.label_keys.is_empty() {
            return Err(ConfigFileError::Invalid {
                message: "discovery.label_keys must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// HTTP listener configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Controller bind address (e.g., "0.0.0.0:8081").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Routing proxy bind address. The proxy surface is not served when unset.
    #[serde(default = "defaults::proxy_bind_addr")]
    pub proxy_bind_addr: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,

    /// Header carrying the tenant identity set by the authenticating gateway.
    #[serde(default = "defaults::tenant_header")]
    pub tenant_header: String,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            proxy_bind_addr: defaults::proxy_bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
            tenant_header: defaults::tenant_header(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },

    /// The configuration parsed but is inconsistent.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:8081".to_string()
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn proxy_bind_addr() -> Option<String> {
        Some("0.0.0.0:8090".to_string())
    }

    pub const fn request_timeout_secs() -> u64 {
        60
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub fn tenant_header() -> String {
        "X-User-ID".to_string()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.server.bind_addr, "0.0.0.0:8081");
        assert_eq!(config.server.proxy_bind_addr.as_deref(), Some("0.0.0.0:8090"));
        assert_eq!(config.server.request_timeout_secs, 60);
        assert!(config.server.graceful_shutdown);
        assert_eq!(config.server.tenant_header, "X-User-ID");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:3000"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        // Defaults applied
        assert_eq!(config.server.request_timeout_secs, 60);
        assert_eq!(config.platform.discovery.default_port, 8080);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            bind_addr = "0.0.0.0:9000"
            request_timeout_secs = 60
            graceful_shutdown = false
            tenant_header = "X-Tenant"

            [logging]
            format = "json"
            filter = "debug"

            [runtime]
            docker_host = "unix:///var/run/docker.sock"
            network = "functions"
            create_timeout_ms = 8000

            [discovery]
            label_keys = ["function"]
            port_label = "fn.port"

            [lifecycle]
            registry_prefix = "registry.internal:5000"

            [lifecycle.readiness]
            settle_delay_ms = 3000
            tcp_probe = false

            [proxy]
            mode = "remote"
            remote_url = "http://proxy:8090"
            upstream_timeout_ms = 40000

            [registry]
            path = "/tmp/functions.json"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.server.request_timeout_secs, 60);
        assert!(!config.server.graceful_shutdown);
        assert_eq!(config.server.tenant_header, "X-Tenant");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.filter.as_deref(), Some("debug"));

        let platform = &config.platform;
        assert_eq!(
            platform.runtime.docker_host.as_deref(),
            Some("unix:///var/run/docker.sock")
        );
        assert_eq!(platform.runtime.network, "functions");
        assert_eq!(platform.runtime.create_timeout_ms, 8000);
        assert_eq!(platform.discovery.label_keys, vec!["function"]);
        assert_eq!(platform.discovery.port_label, "fn.port");
        assert_eq!(platform.lifecycle.registry_prefix, "registry.internal:5000");
        assert_eq!(platform.lifecycle.readiness.settle_delay_ms, 3000);
        assert!(!platform.lifecycle.readiness.tcp_probe);
        assert_eq!(platform.proxy.mode, ForwardMode::Remote);
        assert_eq!(platform.proxy.remote_url, "http://proxy:8090");
        assert_eq!(
            platform.registry.path.as_deref(),
            Some(std::path::Path::new("/tmp/functions.json"))
        );
    }

    #[test]
    fn test_upstream_timeout_must_be_shorter_than_request_timeout() {
        let toml = r#"
            [server]
            request_timeout_secs = 10

            [proxy]
            upstream_timeout_ms = 10000
        "#;

        let err = assert_err!(ConfigFile::from_toml(toml));
        assert!(matches!(err, ConfigFileError::Invalid { .. }));
    }

    #[test]
    fn test_cold_start_budget_must_fit_request_timeout() {
        // Each timeout fits on its own; together they do not.
        let toml = r#"
            [server]
            request_timeout_secs = 30

            [runtime]
            create_timeout_ms = 10000

            [lifecycle.readiness]
            deadline_ms = 10000

            [proxy]
            upstream_timeout_ms = 20000
        "#;
        let err = assert_err!(ConfigFile::from_toml(toml));
        let ConfigFileError::Invalid { message } = err else {
            panic!("expected Invalid, got {err:?}");
        };
        assert!(message.contains("cold start budget"));

        let toml = toml.replace("request_timeout_secs = 30", "request_timeout_secs = 45");
        assert_ok!(ConfigFile::from_toml(&toml));
    }

    #[test]
    fn test_remote_mode_budget_uses_remote_timeout() {
        let toml = r#"
            [server]
            request_timeout_secs = 42

            [proxy]
            mode = "remote"
            remote_url = "http://proxy:8090"
        "#;
        // 10s create + 10s readiness + 25s remote exceeds 42s.
        assert_err!(ConfigFile::from_toml(toml));
    }

    #[test]
    fn test_empty_label_keys_rejected() {
        let toml = r#"
            [discovery]
            label_keys = []
        "#;

        assert_err!(ConfigFile::from_toml(toml));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }
}
