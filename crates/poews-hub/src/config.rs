//! Hub and server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Capacity of the broadcast intake queue. Messages beyond it are dropped.
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,
    /// Capacity of the register and unregister queues.
    #[serde(default = "default_control_capacity")]
    pub control_capacity: usize,
    /// Per-connection write deadline in milliseconds.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_intake_capacity() -> usize {
    256
}

fn default_control_capacity() -> usize {
    64
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            intake_capacity: default_intake_capacity(),
            control_capacity: default_control_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl HubConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Path of the push endpoint.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Maximum concurrent WebSocket connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            ws_path: default_ws_path(),
            max_connections: default_max_connections(),
        }
    }
}
