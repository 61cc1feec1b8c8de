//! Shared application state.
//!
//! [`AppState`] is cloned into every controller handler, so it only holds
//! `Arc`s and cheap values.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName};

use faas_plane_common::PlatformError;
use faas_plane_core::LifecycleManager;

use crate::request::header_tenant;

/// State shared by the controller handlers.
#[derive(Clone)]
pub struct AppState {
    manager: Arc<LifecycleManager>,

    /// Header the caller's tenant is read from.
    tenant_header: HeaderName,
}

impl AppState {
    /// Create controller state.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if `tenant_header` is not a valid header name.
    pub fn new(manager: Arc<LifecycleManager>, tenant_header: &str) -> Result<Self, PlatformError> {
        let tenant_header = HeaderName::try_from(tenant_header).map_err(|e| {
            PlatformError::config(format!("invalid tenant header '{tenant_header}': {e}"))
        })?;

        Ok(Self {
            manager,
            tenant_header,
        })
    }

    pub fn manager(&self) -> &LifecycleManager {
        &self.manager
    }

    pub fn tenant_header(&self) -> &HeaderName {
        &self.tenant_header
    }

    /// The caller's tenant, if the request carries one.
    pub fn tenant(&self, headers: &HeaderMap) -> Option<String> {
        header_tenant(headers, &self.tenant_header)
    }

    /// The caller's tenant, or a `Validation` error.
    pub fn require_tenant(&self, headers: &HeaderMap) -> Result<String, PlatformError> {
        self.tenant(headers)
            .ok_or_else(|| PlatformError::validation("User ID is required"))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tenant_header", &self.tenant_header)
            .field("functions", &self.manager.registry().len())
            .finish_non_exhaustive()
    }
}
