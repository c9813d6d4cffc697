//! Observability for the Ask DAF service
//!
//! Structured logging, process-wide metrics and health reporting.

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::{HealthCheck, HealthMonitor, HealthStatus};
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{ask_span, extract_span, ingest_span, retrieval_span, tool_span};
