//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,poews=debug";

/// Output format, chosen by `RUST_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, with span context.
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl LogFormat {
    /// `production` selects JSON; anything else, or unset, is pretty.
    pub fn from_rust_env(value: Option<&str>) -> Self {
        match value {
            Some("production") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initialize structured logging.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> TelemetryResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let rust_env = std::env::var("RUST_ENV").ok();
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match LogFormat::from_rust_env(rust_env.as_deref()) {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init(),
    };

    installed.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
