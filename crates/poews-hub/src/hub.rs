//! Connection hub: registry ownership and broadcast fan-out.
//!
//! `Hub` is the coordinating task. `HubHandle` is the cheap, cloneable front
//! used by the endpoint (register/unregister), by message producers
//! (broadcast) and by the lifecycle controller (close_all_clients).
//!
//! The task waits on four queues at once. When several are ready, which one
//! is served first is unspecified; within a single queue order is FIFO.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use poews_feed::MessageSink;
use poews_telemetry::Metrics;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::connection::{CloseReason, Connection, ConnectionId};
use crate::error::{HubError, HubResult};

struct Registration {
    id: ConnectionId,
    connection: Box<dyn Connection>,
}

enum Control {
    Shutdown(oneshot::Sender<usize>),
}

/// State shared between the coordinating task and every handle.
struct Shared {
    next_id: AtomicU64,
    clients: AtomicUsize,
    closed: AtomicBool,
    intake_capacity: usize,
}

/// The live connection set. Only ever touched by the coordinating task.
struct Registry {
    clients: HashMap<ConnectionId, Box<dyn Connection>>,
    write_timeout: Duration,
    shared: Arc<Shared>,
}

impl Registry {
    fn publish_count(&self) {
        let total = self.clients.len();
        self.shared.clients.store(total, Ordering::Release);
        Metrics::clients_connected(total);
    }

    async fn register(&mut self, registration: Registration) {
        let Registration { id, mut connection } = registration;
        if self.shared.closed.load(Ordering::Acquire) {
            close_connection(id, connection.as_mut(), CloseReason::GoingAway, self.write_timeout)
                .await;
            return;
        }

        self.clients.insert(id, connection);
        self.publish_count();
        info!(client = id, total = self.clients.len(), "Client connected");
    }

    async fn unregister(&mut self, id: ConnectionId) {
        let Some(mut connection) = self.clients.remove(&id) else {
            debug!(client = id, "Unregister for unknown client ignored");
            return;
        };
        self.publish_count();
        close_connection(id, connection.as_mut(), CloseReason::Normal, self.write_timeout).await;
        info!(client = id, total = self.clients.len(), "Client disconnected");
    }

    /// Write `message` to every registered connection.
    ///
    /// Writes run concurrently and each is bounded by the write deadline.
    /// Connections that fail are closed and evicted after the round.
    async fn broadcast(&mut self, message: String) {
        let write_timeout = self.write_timeout;
        let message_ref = &message;

        let outcomes = join_all(self.clients.iter_mut().map(|(&id, connection)| async move {
            let result = match tokio::time::timeout(
                write_timeout,
                connection.send_text(message_ref.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(HubError::WriteTimeout(write_timeout)),
            };
            (id, result)
        }))
        .await;

        let mut failed = Vec::new();
        for (id, result) in outcomes {
            match result {
                Ok(()) => Metrics::delivery_succeeded(),
                Err(e) => {
                    let reason = match &e {
                        HubError::WriteTimeout(_) => "timeout",
                        _ => "send",
                    };
                    Metrics::delivery_failed(reason);
                    error!(client = id, error = %e, "Error sending to client");
                    failed.push(id);
                }
            }
        }

        for id in failed {
            if let Some(mut connection) = self.clients.remove(&id) {
                close_connection(id, connection.as_mut(), CloseReason::InternalError, write_timeout)
                    .await;
            }
        }
        self.publish_count();

        info!(total_clients = self.clients.len(), message = %message, "Broadcasted message");
    }

    /// Close every connection with `reason` and empty the registry.
    async fn close_all(&mut self, reason: CloseReason) -> usize {
        let write_timeout = self.write_timeout;
        let closing: Vec<_> = self.clients.drain().collect();
        let count = closing.len();

        join_all(closing.into_iter().map(|(id, mut connection)| async move {
            close_connection(id, connection.as_mut(), reason, write_timeout).await;
        }))
        .await;

        self.publish_count();
        count
    }
}

async fn close_connection(
    id: ConnectionId,
    connection: &mut dyn Connection,
    reason: CloseReason,
    write_timeout: Duration,
) {
    match tokio::time::timeout(write_timeout, connection.close(reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(client = id, error = %e, "Error closing client connection"),
        Err(_) => error!(client = id, "Timed out closing client connection"),
    }
}

/// Coordinating task. Create with [`Hub::new`], then spawn [`Hub::run`].
pub struct Hub {
    registry: Registry,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<ConnectionId>,
    intake_rx: mpsc::Receiver<String>,
    control_rx: mpsc::Receiver<Control>,
}

impl Hub {
    /// Create the hub and its first handle.
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(config.control_capacity.max(1));
        let (unregister_tx, unregister_rx) = mpsc::channel(config.control_capacity.max(1));
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(1);

        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(1),
            clients: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            intake_capacity: config.intake_capacity.max(1),
        });

        let hub = Self {
            registry: Registry {
                clients: HashMap::new(),
                write_timeout: config.write_timeout(),
                shared: shared.clone(),
            },
            register_rx,
            unregister_rx,
            intake_rx,
            control_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            intake_tx,
            control_tx,
            shared,
        };
        (hub, handle)
    }

    /// Serve events until shutdown is requested or every handle is dropped.
    pub async fn run(self) {
        let Hub {
            mut registry,
            mut register_rx,
            mut unregister_rx,
            mut intake_rx,
            mut control_rx,
        } = self;

        info!("Hub started");
        loop {
            tokio::select! {
                Some(registration) = register_rx.recv() => {
                    registry.register(registration).await;
                }
                Some(id) = unregister_rx.recv() => {
                    registry.unregister(id).await;
                }
                Some(message) = intake_rx.recv() => {
                    registry.broadcast(message).await;
                }
                control = control_rx.recv() => {
                    match control {
                        Some(Control::Shutdown(ack)) => {
                            let closed = registry.close_all(CloseReason::GoingAway).await;
                            info!(closed, "Closed all clients");
                            if ack.send(closed).is_err() {
                                debug!("Shutdown requester went away before the ack");
                            }
                        }
                        None => {
                            registry.close_all(CloseReason::GoingAway).await;
                        }
                    }
                    break;
                }
            }
        }

        // Registrations that raced the shutdown are turned away, not leaked.
        register_rx.close();
        while let Ok(registration) = register_rx.try_recv() {
            let Registration { id, mut connection } = registration;
            close_connection(
                id,
                connection.as_mut(),
                CloseReason::GoingAway,
                registry.write_timeout,
            )
            .await;
        }
        info!("Hub stopped");
    }
}

/// Cloneable front of the hub.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<ConnectionId>,
    intake_tx: mpsc::Sender<String>,
    control_tx: mpsc::Sender<Control>,
    shared: Arc<Shared>,
}

impl HubHandle {
    /// Hand a connection to the hub.
    ///
    /// Once the hub is closed the connection is closed with going-away and
    /// `HubError::Closed` is returned.
    pub async fn register(&self, mut connection: Box<dyn Connection>) -> HubResult<ConnectionId> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        if self.is_closed() {
            if let Err(e) = connection.close(CloseReason::GoingAway).await {
                error!(client = id, error = %e, "Error closing rejected connection");
            }
            return Err(HubError::Closed);
        }

        match self.register_tx.send(Registration { id, connection }).await {
            Ok(()) => Ok(id),
            Err(mpsc::error::SendError(mut rejected)) => {
                if let Err(e) = rejected.connection.close(CloseReason::GoingAway).await {
                    error!(client = id, error = %e, "Error closing rejected connection");
                }
                Err(HubError::Closed)
            }
        }
    }

    /// Remove a connection and close it normally. Unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        if self.unregister_tx.send(id).await.is_err() {
            debug!(client = id, "Hub stopped before unregister");
        }
    }

    /// Queue `message` for fan-out without waiting.
    ///
    /// Returns `false` if the message was dropped because the intake queue
    /// is full or the hub has stopped.
    pub fn broadcast(&self, message: impl Into<String>) -> bool {
        match self.intake_tx.try_send(message.into()) {
            Ok(()) => {
                Metrics::message_enqueued();
                true
            }
            Err(TrySendError::Full(message)) => {
                Metrics::message_dropped("full");
                warn!(
                    capacity = self.shared.intake_capacity,
                    message = %message,
                    "Intake queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                Metrics::message_dropped("closed");
                debug!("Hub stopped, dropping message");
                false
            }
        }
    }

    /// Close every client with going-away and stop accepting registrations.
    ///
    /// Returns how many connections were closed. Later calls return `Ok(0)`.
    pub async fn close_all_clients(&self) -> HubResult<usize> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.control_tx
            .send(Control::Shutdown(ack_tx))
            .await
            .map_err(|_| HubError::Closed)?;
        ack_rx.await.map_err(|_| HubError::Closed)
    }

    /// Registered client count as last published by the coordinating task.
    pub fn client_count(&self) -> usize {
        self.shared.clients.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl MessageSink for HubHandle {
    fn publish(&self, message: String) -> bool {
        self.broadcast(message)
    }
}
