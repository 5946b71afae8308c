//! Telemetry for the audit engine
//!
//! - `metrics` - Prometheus metrics for audits, rules, retrieval and the
//!   vector store
//!
//! Structured logging goes through `tracing` directly; subscribers are
//! installed by the binary.

pub mod metrics;

pub use metrics::{AuditMetrics, AuditMetricsRegistry, AuditTimer};

use thiserror::Error;

/// Telemetry errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Failed to encode metrics: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
