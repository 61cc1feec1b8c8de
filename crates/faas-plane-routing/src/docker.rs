//! Docker Engine implementation of [`ContainerRuntime`].
//!
//! Talks to the daemon over its API socket. Containers join the compute
//! network through `network_mode` and publish no host ports; their address
//! is read back from the network settings on inspect.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as DockerError;
use bollard::models::{
    ContainerCreateBody, EndpointSettings, HostConfig, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use futures_util::StreamExt;
use tracing::{debug, info};

use faas_plane_common::{ContainerError, ContainerRuntimeConfig};
use faas_plane_core::{ContainerRuntime, ContainerSpec, ContainerStatus};

/// Seconds bollard waits on the daemon before giving up on its own.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Container runtime backed by the Docker Engine API.
pub struct DockerRuntime {
    docker: Docker,
    network: String,
    stop_grace_secs: i32,
}

impl DockerRuntime {
    /// Connect using `config.docker_host`, or the local defaults when unset.
    ///
    /// Supported address formats:
    /// - Unix socket: `unix:///var/run/docker.sock` or `/var/run/docker.sock`
    /// - HTTP: `http://localhost:2375` or `tcp://localhost:2375`
    pub fn connect(config: &ContainerRuntimeConfig) -> Result<Self, ContainerError> {
        let docker = match config.docker_host.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(address) if address.starts_with("http://") || address.starts_with("tcp://") => {
                let addr = address
                    .trim_start_matches("http://")
                    .trim_start_matches("tcp://");
                Docker::connect_with_http(
                    &format!("http://{addr}"),
                    CLIENT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
            }
            Some(address) => Docker::connect_with_socket(
                address.trim_start_matches("unix://"),
                CLIENT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
        }
        .map_err(|e| ContainerError::runtime("connect", e.to_string()))?;

        info!(
            host = config.docker_host.as_deref().unwrap_or("local defaults"),
            network = %config.network,
            "Connected to Docker daemon"
        );

        Ok(Self {
            docker,
            network: config.network.clone(),
            stop_grace_secs: config.stop_grace_secs,
        })
    }

    /// Address on the compute network, falling back to any attached network.
    fn address_of(&self, networks: Option<&HashMap<String, EndpointSettings>>) -> Option<String> {
        let networks = networks?;
        let non_empty = |ip: &Option<String>| ip.clone().filter(|ip| !ip.is_empty());

        networks
            .get(&self.network)
            .and_then(|endpoint| non_empty(&endpoint.ip_address))
            .or_else(|| {
                networks
                    .values()
                    .find_map(|endpoint| non_empty(&endpoint.ip_address))
            })
    }
}

fn restart_policy(name: &str) -> RestartPolicy {
    let name = match name {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        "no" | "" => RestartPolicyNameEnum::NO,
        _ => RestartPolicyNameEnum::UNLESS_STOPPED,
    };
    RestartPolicy {
        name: Some(name),
        maximum_retry_count: None,
    }
}

fn map_error(operation: &'static str, id: &str, error: DockerError) -> ContainerError {
    match error {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => ContainerError::NotFound {
            container_id: id.to_string(),
        },
        other => ContainerError::runtime(operation, other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let host_config = HostConfig {
            network_mode: Some(spec.network.clone()),
            restart_policy: Some(restart_policy(&spec.restart_policy)),
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| ContainerError::runtime("create", e.to_string()))?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
        {
            // Do not leave a created-but-never-started container behind.
            if let Err(remove_err) = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                debug!(container = %created.id, error = %remove_err, "Failed to remove container that did not start");
            }
            return Err(ContainerError::runtime("start", e.to_string()));
        }

        debug!(container = %created.id, name = %spec.name, image = %spec.image, "Container created and started");
        Ok(created.id)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerStatus, ContainerError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error("inspect", id, e))?;

        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        let config = inspect.config.as_ref();
        let address = self.address_of(
            inspect
                .network_settings
                .as_ref()
                .and_then(|ns| ns.networks.as_ref()),
        );

        Ok(ContainerStatus {
            id: inspect.id.clone().unwrap_or_else(|| id.to_string()),
            image: config.and_then(|c| c.image.clone()).unwrap_or_default(),
            running,
            address: address.filter(|_| running),
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
            created: 0,
        })
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        let options = StopContainerOptions {
            t: Some(self.stop_grace_secs),
            ..Default::default()
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error("stop", id, e)),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_error("remove", id, e))
    }

    async fn list_by_label(
        &self,
        key: &str,
        value: Option<&str>,
    ) -> Result<Vec<ContainerStatus>, ContainerError> {
        let label = match value {
            Some(value) => format!("{key}={value}"),
            None => key.to_string(),
        };
        let filters = HashMap::from([
            ("label".to_string(), vec![label]),
            ("status".to_string(), vec!["running".to_string()]),
        ]);

        let options = ListContainersOptions {
            all: false,
            filters: Some(filters),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ContainerError::runtime("list", e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let address = self.address_of(
                    c.network_settings
                        .as_ref()
                        .and_then(|ns| ns.networks.as_ref()),
                );
                Some(ContainerStatus {
                    id,
                    image: c.image.unwrap_or_default(),
                    running: true,
                    address,
                    labels: c.labels.unwrap_or_default(),
                    created: c.created.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String, ContainerError> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_error("logs", id, e))?;
            out.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }
        Ok(out)
    }
}
