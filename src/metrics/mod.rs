//! Metrics module for Prometheus-based monitoring.
//!
//! Process-wide counters and histograms for runs, stages, model calls, rate
//! limiting and test executions. These are separate from the per-run metric
//! map carried by a pipeline context.
//!
//! # Example
//!
//! ```ignore
//! use codeforge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! MetricsCollector::new().record_rate_limit_denial();
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    MODEL_REQUESTS_TOTAL, MODEL_TOKENS_TOTAL, RATE_LIMIT_DENIALS, REGISTRY, RUNS_TOTAL,
    RUN_DURATION, STAGE_DURATION, TEST_EXECUTIONS_TOTAL,
};
