//! Observability for the event publisher
//!
//! Structured logging setup plus per-manager metrics counters.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{LogFormat, init_default_logging, init_logging, parse_level};
pub use metrics::{MessagingMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{broker_span, lifecycle_span, publish_span};
