//! Container runtime, service discovery and request routing for faas-plane.
//!
//! This crate connects the lifecycle manager to real containers:
//! - [`DockerRuntime`]: [`ContainerRuntime`](faas_plane_core::ContainerRuntime)
//!   over the Docker Engine API
//! - [`DiscoveryCache`]: Resolves a function to a live container by label
//! - [`RoutingProxy`]: Forwards invocations to the resolved container
//! - [`RemoteForwarder`]: Forwards invocations to a routing proxy over HTTP

pub mod discovery;
pub mod docker;
pub mod proxy;
pub mod remote;

pub use discovery::{DiscoveredFunction, DiscoveryCache};
pub use docker::DockerRuntime;
pub use proxy::{RoutingProxy, forwardable_headers, response_headers, upstream_url};
pub use remote::{RemoteForwarder, TENANT_HEADER};
