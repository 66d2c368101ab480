//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has been called, so library
//! code can record unconditionally.

use std::time::Duration;

use super::prometheus::{
    MODEL_REQUESTS_TOTAL, MODEL_TOKENS_TOTAL, RATE_LIMIT_DENIALS, RUNS_TOTAL, RUN_DURATION,
    STAGE_DURATION, TEST_EXECUTIONS_TOTAL,
};

/// Metrics collector for recording codeforge operational metrics.
///
/// # Example
///
/// ```ignore
/// use codeforge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_run("success", std::time::Duration::from_millis(850));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished pipeline run.
    pub fn record_run(&self, status: &str, duration: Duration) {
        if let Some(runs_total) = RUNS_TOTAL.get() {
            runs_total.with_label_values(&[status]).inc();
        }
        if let Some(run_duration) = RUN_DURATION.get() {
            run_duration.observe(duration.as_secs_f64());
        }

        tracing::trace!(
            status = status,
            duration_ms = duration.as_millis() as u64,
            "Recorded run metric"
        );
    }

    /// Record one stage outcome.
    pub fn record_stage(&self, stage: &str, status: &str, duration: Duration) {
        if let Some(stage_duration) = STAGE_DURATION.get() {
            stage_duration
                .with_label_values(&[stage, status])
                .observe(duration.as_secs_f64());
        }
    }

    /// Record a backend call and, on success, its token usage.
    ///
    /// # Arguments
    ///
    /// * `backend` - Backend name (e.g. "gemini", "ollama", "stub")
    /// * `success` - Whether the call succeeded
    /// * `input_tokens` / `output_tokens` - Usage reported by the backend
    pub fn record_model_request(
        &self,
        backend: &str,
        success: bool,
        input_tokens: u32,
        output_tokens: u32,
    ) {
        let status = if success { "success" } else { "failure" };

        if let Some(requests) = MODEL_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[backend, status]).inc();
        }

        if success {
            if let Some(tokens) = MODEL_TOKENS_TOTAL.get() {
                tokens
                    .with_label_values(&["input"])
                    .inc_by(f64::from(input_tokens));
                tokens
                    .with_label_values(&["output"])
                    .inc_by(f64::from(output_tokens));
            }
        }

        tracing::trace!(
            backend = backend,
            status = status,
            input_tokens = input_tokens,
            output_tokens = output_tokens,
            "Recorded model request metric"
        );
    }

    /// Record a local rate-limiter denial.
    pub fn record_rate_limit_denial(&self) {
        if let Some(denials) = RATE_LIMIT_DENIALS.get() {
            denials.inc();
        }
    }

    /// Record a test execution with outcome "passed", "failed" or "error".
    pub fn record_test_execution(&self, outcome: &str) {
        if let Some(executions) = TEST_EXECUTIONS_TOTAL.get() {
            executions.with_label_values(&[outcome]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_recording_without_init_does_not_panic() {
        let collector = MetricsCollector::new();
        collector.record_run("success", Duration::from_millis(10));
        collector.record_stage("preprocessing", "success", Duration::from_millis(1));
        collector.record_model_request("stub", true, 3, 4);
        collector.record_rate_limit_denial();
        collector.record_test_execution("passed");
    }

    #[test]
    fn test_recorded_metrics_are_exported() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();
        collector.record_run("failed", Duration::from_millis(20));
        collector.record_stage("packaging", "success", Duration::from_millis(2));
        collector.record_model_request("stub", true, 3, 4);
        collector.record_test_execution("error");

        let text = export_metrics();
        assert!(text.contains("codeforge_runs_total"));
        assert!(text.contains("codeforge_stage_duration_seconds"));
        assert!(text.contains("codeforge_model_tokens_total"));
        assert!(text.contains("codeforge_test_executions_total"));
    }
}
