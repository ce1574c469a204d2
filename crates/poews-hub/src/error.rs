//! Hub error types.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Hub is closed")]
    Closed,

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(#[from] axum::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HubResult<T> = Result<T, HubError>;
