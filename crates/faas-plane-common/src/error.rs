//! Error types for faas-plane.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`PlatformError`]: Top-level errors returned by the lifecycle manager
//!   and the routing proxy
//! - [`ContainerError`]: Errors from the container runtime capability

use std::io;

use thiserror::Error;

/// Top-level platform errors.
///
/// Each variant corresponds to one class of HTTP status at the transport
/// layer, so the server can map them without inspecting messages.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The request was malformed or missing required fields.
    #[error("Validation failed: {reason}")]
    Validation {
        /// Description of the validation failure.
        reason: String,
    },

    /// No function is registered under the requested name.
    #[error("Function '{name}' not found")]
    NotFound {
        /// Name of the function that was looked up.
        name: String,
    },

    /// The caller's tenant does not own the function.
    #[error("Tenant '{tenant}' does not have permission to access function '{name}'")]
    PermissionDenied {
        /// The calling tenant.
        tenant: String,
        /// The function that was accessed.
        name: String,
    },

    /// The function has no bound container.
    #[error("Function '{name}' is not running")]
    NotRunning {
        /// Name of the function.
        name: String,
    },

    /// A container could not be (re)started or resolved.
    #[error("Service unavailable: {reason}")]
    ServiceUnavailable {
        /// Description of why the service is unavailable.
        reason: String,
    },

    /// The upstream container did not answer within the deadline.
    #[error("Function timed out after {duration_ms}ms")]
    GatewayTimeout {
        /// The outbound deadline in milliseconds.
        duration_ms: u64,
    },

    /// An unexpected failure.
    #[error("Internal error: {reason}")]
    Internal {
        /// Description of the failure.
        reason: String,
    },

    /// A container runtime operation failed.
    #[error("Container runtime error: {0}")]
    Container(#[from] ContainerError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    Config {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors from the container runtime capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    /// The container does not exist.
    #[error("Container not found: {container_id}")]
    NotFound {
        /// Identifier of the missing container.
        container_id: String,
    },

    /// The runtime did not answer within the bounded timeout.
    #[error("Container {operation} timed out after {duration_ms}ms")]
    Timeout {
        /// The runtime operation (create, inspect, ...).
        operation: &'static str,
        /// The timeout in milliseconds.
        duration_ms: u64,
    },

    /// The runtime rejected or failed the operation.
    #[error("Container {operation} failed: {message}")]
    Runtime {
        /// The runtime operation (create, inspect, ...).
        operation: &'static str,
        /// Message reported by the runtime.
        message: String,
    },
}

impl PlatformError {
    /// Create a new `Validation` error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a new `NotFound` error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create a new `PermissionDenied` error.
    pub fn permission_denied(tenant: impl Into<String>, name: impl Into<String>) -> Self {
        Self::PermissionDenied {
            tenant: tenant.into(),
            name: name.into(),
        }
    }

    /// Create a new `ServiceUnavailable` error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a new `Internal` error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Create a new `Config` error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates the function was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the upstream container could not serve the request.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. } | Self::GatewayTimeout { .. }
        )
    }
}

impl ContainerError {
    /// Create a new `Runtime` error.
    pub fn runtime(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Runtime {
            operation,
            message: message.into(),
        }
    }

    /// Returns `true` if the container does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
