//! HTTP server implementation.
//!
//! A [`PlatformServer`] serves up to two surfaces: the controller API and
//! the routing proxy API. Each binds its own listener; they shut down
//! together.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use futures_util::future::try_join_all;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use faas_plane_common::{PlatformError, ServerConfigFile};

use crate::proxy::{ProxyState, build_proxy_router};
use crate::router::build_router;
use crate::state::AppState;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the controller API.
    pub bind_addr: SocketAddr,
    /// Address of the routing proxy API.
    pub proxy_bind_addr: Option<SocketAddr>,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            proxy_bind_addr: None,
            request_timeout_secs: 60,
            graceful_shutdown: true,
        }
    }
}

impl ServerConfig {
    /// Build from the `[server]` section of a config file.
    pub fn from_file(file: &ServerConfigFile) -> Result<Self, PlatformError> {
        let parse = |field: &str, value: &str| {
            value.parse::<SocketAddr>().map_err(|e| {
                PlatformError::config(format!("invalid server.{field} '{value}': {e}"))
            })
        };

        Ok(Self {
            bind_addr: parse("bind_addr", &file.bind_addr)?,
            proxy_bind_addr: file
                .proxy_bind_addr
                .as_deref()
                .map(|addr| parse("proxy_bind_addr", addr))
                .transpose()?,
            request_timeout_secs: file.request_timeout_secs,
            graceful_shutdown: file.graceful_shutdown,
        })
    }

    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    #[must_use]
    pub fn with_proxy_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.proxy_bind_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// One of the HTTP APIs a server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Controller,
    Proxy,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controller => write!(f, "controller"),
            Self::Proxy => write!(f, "proxy"),
        }
    }
}

struct Mount {
    surface: Surface,
    addr: SocketAddr,
    router: Router,
}

/// faas-plane HTTP server.
///
/// # Example
///
/// ```ignore
/// PlatformServer::new(config)
///     .controller(app_state)
///     .proxy(proxy_state)
///     .run()
///     .await?;
/// ```
pub struct PlatformServer {
    config: ServerConfig,
    mounts: Vec<Mount>,
}

impl PlatformServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            mounts: Vec::new(),
        }
    }

    /// Serve the controller API on `bind_addr`.
    #[must_use]
    pub fn controller(mut self, state: AppState) -> Self {
        self.mounts.push(Mount {
            surface: Surface::Controller,
            addr: self.config.bind_addr,
            router: build_router(state, self.config.request_timeout()),
        });
        self
    }

    /// Serve the routing proxy API on `proxy_bind_addr`, or on `bind_addr`
    /// when no controller is mounted there.
    #[must_use]
    pub fn proxy(mut self, state: ProxyState) -> Self {
        let addr = self.config.proxy_bind_addr.unwrap_or(self.config.bind_addr);
        self.mounts.push(Mount {
            surface: Surface::Proxy,
            addr,
            router: build_proxy_router(state, self.config.request_timeout()),
        });
        self
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is mounted, an address cannot be bound,
    /// or a listener fails.
    pub async fn run(self) -> Result<(), PlatformError> {
        if self.mounts.is_empty() {
            return Err(PlatformError::config("no HTTP surface configured"));
        }

        let mut listeners = Vec::with_capacity(self.mounts.len());
        for mount in self.mounts {
            let listener = TcpListener::bind(mount.addr).await.map_err(|e| {
                PlatformError::config(format!("failed to bind {} on {}: {e}", mount.surface, mount.addr))
            })?;
            info!(surface = %mount.surface, addr = %mount.addr, "Starting HTTP server");
            listeners.push((listener, mount.router));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let graceful = self.config.graceful_shutdown;
        let signal = tokio::spawn(async move {
            if graceful {
                shutdown_signal().await;
            } else {
                std::future::pending::<()>().await;
            }
            let _ = shutdown_tx.send(true);
        });

        let result = try_join_all(
            listeners
                .into_iter()
                .map(|(listener, router)| serve(listener, router, shutdown_rx.clone())),
        )
        .await;
        signal.abort();
        result?;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start every mounted surface on an ephemeral port and return a
    /// handle for testing.
    pub async fn start_test(self) -> Result<TestHandle, PlatformError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut addrs = Vec::with_capacity(self.mounts.len());
        let mut tasks = Vec::with_capacity(self.mounts.len());

        for mount in self.mounts {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            addrs.push((mount.surface, listener.local_addr()?));
            tasks.push(tokio::spawn(serve(
                listener,
                mount.router,
                shutdown_rx.clone(),
            )));
        }

        Ok(TestHandle {
            addrs,
            shutdown_tx,
            tasks,
        })
    }
}

async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: watch::Receiver<bool>,
) -> Result<(), PlatformError> {
    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await?;
    Ok(())
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Handle for a test server instance.
pub struct TestHandle {
    addrs: Vec<(Surface, SocketAddr)>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<Result<(), PlatformError>>>,
}

impl TestHandle {
    /// Address of a mounted surface.
    pub fn addr(&self, surface: Surface) -> Option<SocketAddr> {
        self.addrs
            .iter()
            .find(|(s, _)| *s == surface)
            .map(|(_, addr)| *addr)
    }

    /// Base URL of a mounted surface.
    pub fn url(&self, surface: Surface) -> Option<String> {
        self.addr(surface).map(|addr| format!("http://{addr}"))
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
