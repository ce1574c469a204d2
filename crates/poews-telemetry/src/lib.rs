//! Prometheus metrics and structured logging for poews.
//!
//! - Structured logging with tracing (pretty in development, JSON in production)
//! - Prometheus counters for the hub intake, fan-out deliveries and file polling

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, LogFormat};
pub use metrics::Metrics;
