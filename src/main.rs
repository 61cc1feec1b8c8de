//! faas-plane CLI entry point.
//!
//! Runs the controller API and, unless disabled, the routing proxy API in
//! one process. `--proxy-only` runs just the routing proxy, for deployments
//! where controllers forward to it over HTTP (`proxy.mode = "remote"`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use faas_plane_common::{ConfigFile, ForwardMode, LogFormat, LoggingConfig};
use faas_plane_core::{ContainerRuntime, DeadlineRuntime, Forwarder, LifecycleManager, RegistryStore};
use faas_plane_routing::{DiscoveryCache, DockerRuntime, RemoteForwarder, RoutingProxy};
use faas_plane_server::{AppState, PlatformServer, ProxyState, ServerConfig};

const DEFAULT_FILTER: &str = "info,faas_plane=debug";

#[derive(Parser, Debug)]
#[command(name = "faas-plane")]
#[command(version, about = "Self-hosted functions-as-a-service control plane", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, value_name = "FILE", env = "FAAS_PLANE_CONFIG")]
    config: Option<PathBuf>,

    /// Controller listen address (overrides `server.bind_addr`).
    #[arg(long, env = "BIND_ADDR")]
    bind_addr: Option<SocketAddr>,

    /// Routing proxy listen address (overrides `server.proxy_bind_addr`).
    #[arg(long, env = "PROXY_BIND_ADDR")]
    proxy_bind_addr: Option<SocketAddr>,

    /// Do not serve the routing proxy API.
    #[arg(long, conflicts_with = "proxy_only")]
    no_proxy: bool,

    /// Serve only the routing proxy API.
    #[arg(long)]
    proxy_only: bool,

    /// Registry snapshot file (overrides `registry.path`).
    #[arg(long, env = "REGISTRY_PATH")]
    registry_path: Option<PathBuf>,

    /// Docker daemon address (overrides `runtime.docker_host`).
    #[arg(long, env = "DOCKER_HOST")]
    docker_host: Option<String>,

    /// Emit JSON logs (overrides `logging.format`).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => ConfigFile::default(),
    };
    apply_overrides(&cli, &mut file);
    file.validate().context("Invalid configuration")?;

    init_tracing(&file.logging)?;

    info!(
        config = ?cli.config,
        mode = ?file.platform.proxy.mode,
        network = %file.platform.runtime.network,
        "Starting faas-plane"
    );

    let server_config = ServerConfig::from_file(&file.server)?;
    let platform = &file.platform;

    let docker = DockerRuntime::connect(&platform.runtime).context("Failed to connect to Docker")?;
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DeadlineRuntime::new(Arc::new(docker), platform.runtime.clone()));

    let discovery = Arc::new(DiscoveryCache::new(
        runtime.clone(),
        platform.discovery.clone(),
    ));
    let proxy = Arc::new(RoutingProxy::new(discovery, &platform.proxy)?);

    let mut server = PlatformServer::new(server_config);
    let mut registry = None;

    if !cli.proxy_only {
        let forwarder: Arc<dyn Forwarder> = match platform.proxy.mode {
            ForwardMode::Embedded => proxy.clone(),
            ForwardMode::Remote => Arc::new(RemoteForwarder::new(&platform.proxy)?),
        };

        let store = RegistryStore::load(&platform.registry);
        registry = Some(store.clone());

        let manager = LifecycleManager::new(store, runtime, forwarder, platform);
        let state = AppState::new(Arc::new(manager), &file.server.tenant_header)?;
        server = server.controller(state);
    }

    let serve_proxy = cli.proxy_only || (!cli.no_proxy && file.server.proxy_bind_addr.is_some());
    if serve_proxy {
        server = server.proxy(ProxyState::new(proxy));
    }

    server.run().await?;

    if let Some(registry) = registry {
        registry
            .persist_now()
            .await
            .context("Failed to persist registry on shutdown")?;
    }

    Ok(())
}

fn apply_overrides(cli: &Cli, file: &mut ConfigFile) {
    if let Some(addr) = cli.bind_addr {
        file.server.bind_addr = addr.to_string();
    }
    if let Some(addr) = cli.proxy_bind_addr {
        file.server.proxy_bind_addr = Some(addr.to_string());
    }
    if let Some(path) = &cli.registry_path {
        file.platform.registry.path = Some(path.clone());
    }
    if let Some(host) = &cli.docker_host {
        file.platform.runtime.docker_host = Some(host.clone());
    }
    if cli.log_json {
        file.logging.format = LogFormat::Json;
    }
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(logging.filter.as_deref().unwrap_or(DEFAULT_FILTER))
            .context("Invalid logging.filter")
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
    Ok(())
}
