//! HTTP server: WebSocket push endpoint, status and metrics.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use poews_feed::FileTailer;
use poews_telemetry::Metrics;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::WsConnection;
use crate::error::{HubError, HubResult};
use crate::hub::HubHandle;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct ServerState {
    hub: HubHandle,
    tailer: Arc<FileTailer>,
    connection_slots: Arc<Semaphore>,
    max_connections: usize,
}

impl ServerState {
    pub fn new(hub: HubHandle, tailer: Arc<FileTailer>, config: &ServerConfig) -> Self {
        Self {
            hub,
            tailer,
            connection_slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        }
    }
}

/// Point-in-time view of the relay, served at `/api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub timestamp_ms: i64,
    pub clients: usize,
    pub watching: bool,
    pub path: Option<String>,
    pub offset: Option<u64>,
}

/// Create the axum router.
pub fn create_router(state: ServerState, config: &ServerConfig) -> Router {
    Router::new()
        .route(&config.ws_path, get(ws_handler))
        .route("/api/status", get(get_status))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_status(State(state): State<ServerState>) -> Json<StatusSnapshot> {
    let watch = state.tailer.current_watch();
    Json(StatusSnapshot {
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        clients: state.hub.client_count(),
        watching: watch.is_some(),
        path: watch
            .as_ref()
            .map(|w| w.path.to_string_lossy().replace('\\', "/")),
        offset: watch.map(|w| w.offset),
    })
}

async fn get_metrics() -> Response {
    match Metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(State(state): State<ServerState>, ws: WebSocketUpgrade) -> Response {
    // The permit travels with the socket and frees the slot when it drops.
    let permit = match state.connection_slots.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!(
                max = state.max_connections,
                "WebSocket connection limit reached"
            );
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, permit))
}

/// Register the socket with the hub and read until the client goes away.
///
/// Inbound frames carry no meaning; reading only detects termination.
async fn handle_socket(socket: WebSocket, hub: HubHandle, _permit: OwnedSemaphorePermit) {
    let (sink, mut stream) = socket.split();

    let id = match hub.register(Box::new(WsConnection::new(sink))).await {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "Connection refused by hub");
            return;
        }
    };

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(frame)) => {
                debug!(client = id, ?frame, "Connection closed normally");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(client = id, error = %e, "Read error");
                break;
            }
        }
    }

    hub.unregister(id).await;
}

/// Bind the listening socket.
pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Serve `router` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> HubResult<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(HubError::Io)
}
