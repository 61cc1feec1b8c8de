//! Common types, errors, and configuration for faas-plane.
//!
//! This crate provides shared functionality used across the faas-plane workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the runtime, lifecycle, and proxy
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{
    ContainerRuntimeConfig, DiscoveryConfig, ForwardMode, LifecycleConfig, PlatformConfig,
    ProxyConfig, ReadinessConfig, RegistryConfig,
};
pub use config_file::{ConfigFile, ConfigFileError, LogFormat, LoggingConfig, ServerConfigFile};
pub use error::{ContainerError, PlatformError};
