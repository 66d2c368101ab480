//! Request, outcome and result types for pipeline runs.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed stages of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageName {
    Preprocessing,
    ModelInvocation,
    Normalization,
    Optimization,
    Validation,
    Testing,
    Packaging,
}

impl StageName {
    /// Execution order.
    pub const ALL: [StageName; 7] = [
        StageName::Preprocessing,
        StageName::ModelInvocation,
        StageName::Normalization,
        StageName::Optimization,
        StageName::Validation,
        StageName::Testing,
        StageName::Packaging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Preprocessing => "preprocessing",
            StageName::ModelInvocation => "modelInvocation",
            StageName::Normalization => "normalization",
            StageName::Optimization => "optimization",
            StageName::Validation => "validation",
            StageName::Testing => "testing",
            StageName::Packaging => "packaging",
        }
    }

    /// Whether a failure of this stage aborts the run.
    ///
    /// Optimization, validation and testing are best-effort: their failures
    /// are recorded and the run continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StageName::Preprocessing
                | StageName::ModelInvocation
                | StageName::Normalization
                | StageName::Packaging
        )
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Success => write!(f, "success"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Success,
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Success => write!(f, "success"),
            PipelineStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-run tuning knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    pub skip_optimization: bool,
    pub skip_validation: bool,
    pub skip_testing: bool,
}

/// Input to a run. Not modified once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    pub prompt: String,
    /// Target language; resolved from the prompt or the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Model identifier override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Test suite to run the generated code against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_suite_id: Option<String>,
    #[serde(default)]
    pub options: PipelineOptions,
}

impl PipelineRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            language: None,
            model: None,
            test_suite_id: None,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_test_suite(mut self, suite_id: impl Into<String>) -> Self {
        self.test_suite_id = Some(suite_id.into());
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }
}

/// Recorded result of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutcome {
    pub stage: StageName,
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StageOutcome {
    pub fn success(stage: StageName, duration: Duration, data: Option<serde_json::Value>) -> Self {
        Self {
            stage,
            status: StageStatus::Success,
            duration_ms: duration.as_millis() as u64,
            error: None,
            data,
        }
    }

    pub fn failed(stage: StageName, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            duration_ms: duration.as_millis() as u64,
            error: Some(error.into()),
            data: None,
        }
    }

    /// Skipped stages take no time and carry nothing.
    pub fn skipped(stage: StageName) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            duration_ms: 0,
            error: None,
            data: None,
        }
    }
}

/// Pass/fail counts surfaced on the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
}

/// Durable projection of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub run_id: String,
    pub status: PipelineStatus,
    pub code: String,
    pub language: String,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    /// Outcomes in execution order.
    pub stages: Vec<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_results: Option<TestSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: BTreeMap<String, f64>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }

    /// Outcome recorded for `stage`, if it ran or was skipped.
    pub fn stage(&self, stage: StageName) -> Option<&StageOutcome> {
        self.stages.iter().find(|outcome| outcome.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_policy() {
        assert_eq!(StageName::ALL[0], StageName::Preprocessing);
        assert_eq!(StageName::ALL[6], StageName::Packaging);
        let fatal: Vec<_> = StageName::ALL.iter().filter(|s| s.is_fatal()).collect();
        assert_eq!(
            fatal,
            vec![
                &StageName::Preprocessing,
                &StageName::ModelInvocation,
                &StageName::Normalization,
                &StageName::Packaging
            ]
        );
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: PipelineRequest = serde_json::from_str(
            r#"{"prompt":"add two numbers","testSuiteId":"add","options":{"skipTesting":true,"maxTokens":256}}"#,
        )
        .expect("valid request");

        assert_eq!(request.test_suite_id.as_deref(), Some("add"));
        assert!(request.options.skip_testing);
        assert!(!request.options.skip_validation);
        assert_eq!(request.options.max_tokens, Some(256));
        assert!(request.language.is_none());
    }

    #[test]
    fn test_stage_outcome_serialization() {
        let outcome = StageOutcome::skipped(StageName::ModelInvocation);
        let json = serde_json::to_value(&outcome).expect("serializable");
        assert_eq!(json["stage"], "modelInvocation");
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["durationMs"], 0);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = PipelineResult {
            run_id: "run-1".to_string(),
            status: PipelineStatus::Success,
            code: "x = 1\n".to_string(),
            language: "python".to_string(),
            duration_ms: 12,
            started_at: Utc::now(),
            stages: vec![StageOutcome::skipped(StageName::Testing)],
            test_results: None,
            artifact_id: Some("a1".to_string()),
            error: None,
            metrics: BTreeMap::new(),
        };
        let json = serde_json::to_value(&result).expect("serializable");
        assert_eq!(json["runId"], "run-1");
        assert_eq!(json["durationMs"], 12);
        assert_eq!(json["artifactId"], "a1");
        assert!(json.get("startedAt").is_some());
        assert!(json.get("run_id").is_none());
        assert!(json.get("testResults").is_none());
        assert_eq!(json["stages"][0]["durationMs"], 0);
    }
}
