//! HTTP surfaces for faas-plane.
//!
//! This crate exposes the control plane over HTTP:
//!
//! - The controller API (register, start, stop, delete, list, invoke, logs)
//! - The routing proxy API (`/function/{name}`, `/functions`)
//! - Conversion between axum requests and [`InvocationRequest`]s
//! - Error-to-status mapping
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use faas_plane_server::{AppState, PlatformServer, ServerConfig};
//!
//! let manager = Arc::new(LifecycleManager::new(registry, runtime, forwarder, &config));
//! let state = AppState::new(manager, "X-User-ID")?;
//!
//! PlatformServer::new(ServerConfig::default())
//!     .controller(state)
//!     .run()
//!     .await?;
//! ```
//!
//! [`InvocationRequest`]: faas_plane_core::InvocationRequest

pub mod handler;
pub mod proxy;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use proxy::{ProxyState, build_proxy_router};
pub use response::{ApiError, error_to_response};
pub use router::build_router;
pub use server::{PlatformServer, ServerConfig, Surface, TestHandle};
pub use state::AppState;
