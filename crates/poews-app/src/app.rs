//! Application lifecycle.
//!
//! Start order: hub task, listening socket, file watch, HTTP server,
//! operator input. Stop order: file watch, client connections, HTTP server.
//! Clients are closed even when the watcher overruns `shutdown_timeout_ms`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use poews_feed::{FileTailer, MessageSink, TailerConfig};
use poews_hub::{create_router, Hub, HubHandle, HubResult, ServerState};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::input::spawn_stdin_reader;

/// Configured but not yet started relay.
pub struct Application {
    config: AppConfig,
}

impl Application {
    /// Create a new application instance.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Bring every component up and return the running relay.
    ///
    /// Bind and watch-start failures are returned; nothing keeps running in
    /// that case.
    pub async fn start(self) -> AppResult<RunningApp> {
        let config = self.config;
        let path = config
            .watcher
            .file_path
            .clone()
            .ok_or_else(|| AppError::Config("watcher.file_path is not set".to_string()))?;

        let (hub, handle) = Hub::new(config.hub.clone());
        let hub_task = tokio::spawn(hub.run());

        let listener = poews_hub::bind(&config.server.listen_addr)
            .await
            .map_err(|source| AppError::Bind {
                addr: config.server.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let sink: Arc<dyn MessageSink> = Arc::new(handle.clone());
        let tailer = Arc::new(FileTailer::new(
            TailerConfig::from(&config.watcher),
            sink.clone(),
        ));
        let offset = tailer.watch(&path).await?;
        info!(path = %path.display(), offset, "Watching log file");

        let state = ServerState::new(handle.clone(), tailer.clone(), &config.server);
        let router = create_router(state, &config.server);
        let server_shutdown = CancellationToken::new();
        let server_task = tokio::spawn(poews_hub::serve(
            listener,
            router,
            server_shutdown.clone(),
        ));
        info!(
            addr = %local_addr,
            ws_path = %config.server.ws_path,
            "WebSocket endpoint ready"
        );

        if config.input.stdin {
            match spawn_stdin_reader(sink) {
                Ok(_) => info!("Reading operator input from stdin"),
                Err(e) => warn!(error = %e, "Failed to start operator input"),
            }
        }

        Ok(RunningApp {
            local_addr,
            hub: handle,
            tailer,
            server_shutdown,
            server_task,
            hub_task,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Run until Ctrl+C or SIGTERM, then shut down.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes, then shut down.
    pub async fn run_until(self, signal: impl Future<Output = ()>) -> AppResult<()> {
        let mut running = self.start().await?;

        tokio::select! {
            _ = signal => {
                info!("Shutdown signal received");
            }
            result = &mut running.server_task => {
                error!(?result, "Server stopped unexpectedly");
                running.tailer.stop().await;
                if let Err(e) = running.hub.close_all_clients().await {
                    error!(error = %e, "Failed to close client connections");
                }
                return match result {
                    Ok(Err(e)) => Err(e.into()),
                    _ => Ok(()),
                };
            }
        }

        running.shutdown().await
    }
}

/// Handles to a started relay.
pub struct RunningApp {
    local_addr: SocketAddr,
    hub: HubHandle,
    tailer: Arc<FileTailer>,
    server_shutdown: CancellationToken,
    server_task: JoinHandle<HubResult<()>>,
    hub_task: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl RunningApp {
    /// Address the server actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn tailer(&self) -> &Arc<FileTailer> {
        &self.tailer
    }

    /// Stop watching, close every client with going-away, then stop the server.
    ///
    /// Waiting on the watcher and the server is bounded by the shutdown
    /// deadline. Closing the clients always happens, late or not; each close is
    /// bounded by the hub's write deadline. Tasks still running at the deadline
    /// are left to finish in the background and `ShutdownTimeout` is returned.
    pub async fn shutdown(self) -> AppResult<()> {
        let RunningApp {
            hub,
            tailer,
            server_shutdown,
            server_task,
            hub_task,
            shutdown_timeout,
            ..
        } = self;
        let deadline = Instant::now() + shutdown_timeout;
        let mut overran = false;
        let mut outcome: AppResult<()> = Ok(());

        info!("Stopping file watcher");
        if timeout_at(deadline, tailer.stop()).await.is_err() {
            warn!("File watcher did not stop before the deadline");
            overran = true;
        }

        match hub.close_all_clients().await {
            Ok(closed) => info!(closed, "Closed client connections"),
            Err(e) => error!(error = %e, "Failed to close client connections"),
        }

        info!("Stopping server");
        server_shutdown.cancel();
        match timeout_at(deadline, server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                error!(error = %e, "Server stopped with error");
                outcome = Err(e.into());
            }
            Ok(Err(e)) => warn!(error = %e, "Server task failed"),
            Err(_) => {
                warn!("Server did not stop before the deadline");
                overran = true;
            }
        }

        match timeout_at(deadline, hub_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Hub task failed"),
            Err(_) => {
                warn!("Hub did not stop before the deadline");
                overran = true;
            }
        }

        if overran {
            let timeout_ms = u64::try_from(shutdown_timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(timeout_ms, "Shutdown deadline elapsed");
            return Err(AppError::ShutdownTimeout(timeout_ms));
        }
        info!("Shutdown complete");
        outcome
    }
}

/// Resolve on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
