//! poews-hub - Connection hub and WebSocket endpoint.
//!
//! Fans formatted trade messages out to every connected client.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   broadcast()    ┌─────────────────────────────────────┐
//! │ FileTailer   │ ───────────────▶ │ intake (bounded, drop on full)      │
//! │ stdin input  │                  │                                     │
//! └──────────────┘                  │        Hub coordinating task        │
//!                                   │  select! { register | unregister |  │
//! ┌──────────────┐   register()     │            message | shutdown }     │
//! │ /ws handler  │ ───────────────▶ │                                     │
//! │ (per socket) │   unregister()   │  registry: id -> Box<dyn Connection>│
//! └──────────────┘                  └──────────────┬──────────────────────┘
//!                                                  │ concurrent writes,
//!                                                  ▼ failures evicted
//!                                         client 1 .. client N
//! ```
//!
//! Only the coordinating task touches the registry, so it needs no lock.
//!
//! # Usage
//!
//! ```ignore
//! use poews_hub::{Hub, HubConfig};
//!
//! let (hub, handle) = Hub::new(HubConfig::default());
//! tokio::spawn(hub.run());
//!
//! handle.broadcast("From Aria: WTS Chaos Orb");
//! ```

mod config;
mod connection;
mod error;
mod hub;
mod server;

pub use config::{HubConfig, ServerConfig};
pub use connection::{BoxFuture, CloseReason, Connection, ConnectionId, WsConnection};
pub use error::{HubError, HubResult};
pub use hub::{Hub, HubHandle};
pub use server::{bind, create_router, serve, ServerState, StatusSnapshot};
