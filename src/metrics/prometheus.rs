//! Prometheus metrics registration and export.
//!
//! This module defines the process-wide Prometheus metrics used by codeforge
//! and provides functions for initializing, registering, and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{Mutex, OnceLock};

/// Global Prometheus registry for all codeforge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total pipeline runs, labeled by terminal status.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// End-to-end run duration in seconds.
pub static RUN_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Stage duration in seconds, labeled by stage and outcome status.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Total model backend calls, labeled by backend and status.
pub static MODEL_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total tokens reported by backends, labeled by type (input/output).
pub static MODEL_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Requests denied by the local rate limiter.
pub static RATE_LIMIT_DENIALS: OnceLock<Counter> = OnceLock::new();

/// Test executions, labeled by outcome (passed/failed/error).
pub static TEST_EXECUTIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless; later calls leave the first
/// registration in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    static INIT_LOCK: Mutex<()> = Mutex::new(());
    let _guard = INIT_LOCK.lock().expect("metrics init lock poisoned");
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let runs_total = CounterVec::new(
        Opts::new("codeforge_runs_total", "Total pipeline runs"),
        &["status"],
    )?;

    let run_duration = Histogram::with_opts(
        HistogramOpts::new(
            "codeforge_run_duration_seconds",
            "Pipeline run duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )?;

    let stage_duration = HistogramVec::new(
        HistogramOpts::new(
            "codeforge_stage_duration_seconds",
            "Pipeline stage duration in seconds",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        &["stage", "status"],
    )?;

    let model_requests_total = CounterVec::new(
        Opts::new("codeforge_model_requests_total", "Total model backend calls"),
        &["backend", "status"],
    )?;

    let model_tokens_total = CounterVec::new(
        Opts::new("codeforge_model_tokens_total", "Total tokens used"),
        &["type"],
    )?;

    let rate_limit_denials = Counter::new(
        "codeforge_rate_limit_denials_total",
        "Model calls denied by the local rate limiter",
    )?;

    let test_executions_total = CounterVec::new(
        Opts::new(
            "codeforge_test_executions_total",
            "Generated-code test executions",
        ),
        &["outcome"],
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(run_duration.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(model_requests_total.clone()))?;
    registry.register(Box::new(model_tokens_total.clone()))?;
    registry.register(Box::new(rate_limit_denials.clone()))?;
    registry.register(Box::new(test_executions_total.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = RUN_DURATION.set(run_duration);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = MODEL_REQUESTS_TOTAL.set(model_requests_total);
    let _ = MODEL_TOKENS_TOTAL.set(model_tokens_total);
    let _ = RATE_LIMIT_DENIALS.set(rate_limit_denials);
    let _ = TEST_EXECUTIONS_TOTAL.set(test_executions_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();
        if let Some(denials) = RATE_LIMIT_DENIALS.get() {
            denials.inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("codeforge_rate_limit_denials_total"));
    }
}
