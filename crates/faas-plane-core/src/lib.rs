//! Function registry and lifecycle management for faas-plane.
//!
//! This crate provides the container-agnostic heart of the control plane:
//! - [`RegistryStore`]: Durable, tenant-scoped function records
//! - [`LifecycleManager`]: Start/stop/delete, reconciliation and cold start
//! - [`ContainerRuntime`]: Capability the manager drives containers through
//! - [`Forwarder`]: Capability invocations are delivered through
//!
//! # Architecture
//!
//! ```text
//!   register / start / stop / delete / invoke
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                  LifecycleManager                       │
//! │  - Per-function locks                                   │
//! │  - Ownership checks                                     │
//! │  - Reconciliation and readiness polling                 │
//! └─────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌────────────────┐
//! │ RegistryStore  │  │ ContainerRuntime │  │   Forwarder    │
//! │ (JSON snapshot)│  │ (Docker, mock)   │  │ (routing proxy)│
//! └────────────────┘  └──────────────────┘  └────────────────┘
//! ```

pub mod forward;
pub mod function;
pub mod lifecycle;
pub mod lock;
pub mod readiness;
pub mod registry;
pub mod runtime;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use forward::{BodyStream, Forwarder, InvocationRequest, InvocationResponse, RouteTarget};
pub use function::{
    ContainerBinding, FunctionKey, FunctionRecord, FunctionSpec, FunctionState, FunctionView,
    StoredFunction, namespace_image, validate_name,
};
pub use lifecycle::{
    DEFAULT_LOG_LINES, FunctionLogs, LifecycleManager, MANAGED_LABEL, StartOutcome, StopOutcome,
};
pub use lock::KeyedLocks;
pub use readiness::{Readiness, wait_until_ready};
pub use registry::{INVOKE_LOOKUP, Lookup, MANAGE_LOOKUP, RegistryStore};
pub use runtime::{ContainerRuntime, ContainerSpec, ContainerStatus, DeadlineRuntime};
