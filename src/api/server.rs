use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::api::routes::{build_router, AppState};
use crate::api::shutdown::ShutdownManager;
use crate::config::Config;
use crate::process::{ProcessState, ProcessTable};

pub struct ApiServer {
    pub addr: SocketAddr,
    /// Bound by [`ApiServer::bind`], consumed by [`ApiServer::run`].
    listener: TcpListener,
    state: AppState,
    shutdown: Arc<ShutdownManager>,
}

impl ApiServer {
    /// Binds the configured address. `log_dir` overrides the configured one.
    pub async fn bind(config: &Config, log_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = config.server.bind_addr.parse().map_err(|e| {
            anyhow::anyhow!("Invalid bind address '{}': {}", config.server.bind_addr, e)
        })?;
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;

        let log_dir = log_dir.unwrap_or_else(|| config.server.log_dir.clone());
        std::fs::create_dir_all(&log_dir)?;
        tracing::info!(addr = %addr, log_dir = %log_dir.display(), "API server bound");

        Ok(Self {
            addr,
            listener,
            state: AppState::new(ProcessTable::new(), log_dir, config.engine.clone()),
            shutdown: Arc::new(ShutdownManager::new()),
        })
    }

    pub fn table(&self) -> ProcessTable {
        self.state.table.clone()
    }

    pub fn handle(&self) -> ApiHandle {
        ApiHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Serves until shutdown.
    ///
    /// Running processes are killed as soon as shutdown begins so that live
    /// log streams end and their connections can drain.
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Starting API server on {}", self.addr);

        let table = self.state.table.clone();
        let app = build_router(self.state);
        let shutdown = self.shutdown.clone();
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                if let Err(err) = shutdown.wait_for_shutdown().await {
                    tracing::error!(error = %err, "failed to install signal handlers");
                }
                kill_running(&table);
            })
            .into_future()
            .await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

fn kill_running(table: &ProcessTable) {
    for process in table.list() {
        if process.state() == ProcessState::Running {
            tracing::info!(id = process.id(), "killing running process");
            if let Err(err) = process.kill() {
                tracing::warn!(id = process.id(), error = %err, "kill failed");
            }
        }
    }
}

#[derive(Clone)]
pub struct ApiHandle {
    shutdown: Arc<ShutdownManager>,
}

impl ApiHandle {
    pub fn shutdown(&self) {
        self.shutdown.signal_shutdown();
    }
}
