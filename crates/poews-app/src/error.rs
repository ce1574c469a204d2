//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Feed error: {0}")]
    Feed(#[from] poews_feed::FeedError),

    #[error("Hub error: {0}")]
    Hub(#[from] poews_hub::HubError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] poews_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown did not finish within {0} ms")]
    ShutdownTimeout(u64),
}

pub type AppResult<T> = Result<T, AppError>;
