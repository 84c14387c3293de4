//! Observability: structured logging and per-output publish metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{MetricsSnapshot, PublishMetrics};

// Span macros for structured logging
pub use logging::{broker_span, lifecycle_span, publish_span};
