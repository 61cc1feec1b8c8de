//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests and downstream crates).
//!
//! # Modules
//!
//! - [`runtime`]: [`MockRuntime`], an in-memory [`ContainerRuntime`](crate::ContainerRuntime)
//!   with failure injection and out-of-band container manipulation.
//! - [`forward`]: [`RecordingForwarder`], a [`Forwarder`](crate::Forwarder) that
//!   records what it was asked to deliver.
//! - [`config`]: Platform configurations tuned for fast tests.

pub mod config;
pub mod forward;
pub mod runtime;

pub use forward::RecordingForwarder;
pub use runtime::MockRuntime;
