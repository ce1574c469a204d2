//! poews: trade whisper relay.
//!
//! Wires the feed, hub and HTTP server together:
//! - Tails the game client's log file for `@From` whispers
//! - Fans trade messages out to every WebSocket client
//! - Forwards operator stdin lines as extra messages
//! - Shuts down in order within a deadline

pub mod app;
pub mod config;
pub mod error;
pub mod input;

pub use app::{shutdown_signal, Application, RunningApp};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
