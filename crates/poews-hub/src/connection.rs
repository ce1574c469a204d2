//! Outbound half of a client connection.
//!
//! The hub owns one `Connection` per registered client and only ever writes
//! to it. Reading (to notice the client going away) stays with the endpoint.

use std::future::Future;
use std::pin::Pin;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;

use crate::error::HubResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identity of a registered connection. Never reused within a hub.
pub type ConnectionId = u64;

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly unregister.
    Normal,
    /// A write to the client failed.
    InternalError,
    /// The server is shutting down.
    GoingAway,
}

impl CloseReason {
    /// WebSocket close code (RFC 6455 §7.4.1).
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => close_code::NORMAL,
            Self::InternalError => close_code::ERROR,
            Self::GoingAway => close_code::AWAY,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Self::Normal | Self::InternalError => "",
            Self::GoingAway => "server shutting down",
        }
    }
}

/// Write side of one client stream.
pub trait Connection: Send {
    /// Send one text frame.
    fn send_text(&mut self, text: String) -> BoxFuture<'_, HubResult<()>>;

    /// Send a close frame. The connection is not written to afterwards.
    fn close(&mut self, reason: CloseReason) -> BoxFuture<'_, HubResult<()>>;
}

/// `Connection` over the sink half of an axum WebSocket.
pub struct WsConnection {
    sink: SplitSink<WebSocket, Message>,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

impl Connection for WsConnection {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, HubResult<()>> {
        Box::pin(async move {
            self.sink.send(Message::Text(text.into())).await?;
            Ok(())
        })
    }

    fn close(&mut self, reason: CloseReason) -> BoxFuture<'_, HubResult<()>> {
        Box::pin(async move {
            let frame = CloseFrame {
                code: reason.code(),
                reason: reason.text().into(),
            };
            self.sink.send(Message::Close(Some(frame))).await?;
            Ok(())
        })
    }
}
