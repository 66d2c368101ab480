//! Per-run mutable state.
//!
//! Stages only talk to each other through the context: each writes its
//! products under a [`DataKey`] and later stages read them back.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::RngExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::types::{PipelineRequest, StageName, StageOutcome};

/// Keys for data passed between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKey {
    ProcessedPrompt,
    ModelPrompt,
    EstimatedTokens,
    Language,
    RawModelOutput,
    FinishReason,
    ExtractedCode,
    Explanation,
    DetectedLanguage,
    OptimizedCode,
    OptimizationReport,
    ValidationIssues,
    TestResult,
    CodeArtifactId,
}

impl DataKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKey::ProcessedPrompt => "processedPrompt",
            DataKey::ModelPrompt => "modelPrompt",
            DataKey::EstimatedTokens => "estimatedTokens",
            DataKey::Language => "language",
            DataKey::RawModelOutput => "rawModelOutput",
            DataKey::FinishReason => "finishReason",
            DataKey::ExtractedCode => "extractedCode",
            DataKey::Explanation => "explanation",
            DataKey::DetectedLanguage => "detectedLanguage",
            DataKey::OptimizedCode => "optimizedCode",
            DataKey::OptimizationReport => "optimizationReport",
            DataKey::ValidationIssues => "validationIssues",
            DataKey::TestResult => "testResult",
            DataKey::CodeArtifactId => "codeArtifactId",
        }
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generates a run id: `run-<base36 millis>-<base36 random>`.
///
/// The time component sorts runs roughly by start; the random suffix keeps
/// ids created in the same millisecond apart.
pub fn generate_run_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random: u64 = rand::rng().random_range(0..u64::MAX);
    format!("run-{}-{}", to_base36(millis), to_base36(random))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// State of a single run, owned by the runner until the result is built.
#[derive(Debug)]
pub struct PipelineContext {
    run_id: String,
    request: PipelineRequest,
    started_at: DateTime<Utc>,
    start: Instant,
    stages: Vec<StageOutcome>,
    data: HashMap<DataKey, Value>,
    metrics: BTreeMap<String, f64>,
}

impl PipelineContext {
    /// Allocates a run id and start time for `request`.
    pub fn new(request: PipelineRequest) -> Self {
        let context = Self {
            run_id: generate_run_id(),
            request,
            started_at: Utc::now(),
            start: Instant::now(),
            stages: Vec::new(),
            data: HashMap::new(),
            metrics: BTreeMap::new(),
        };
        tracing::info!(
            run_id = %context.run_id,
            language = context.request.language.as_deref().unwrap_or("auto"),
            "Pipeline context created"
        );
        context
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn request(&self) -> &PipelineRequest {
        &self.request
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Records a stage outcome, replacing an earlier outcome for the same stage.
    ///
    /// Outcomes of other stages are never touched and order of first
    /// recording is preserved.
    pub fn record_stage(&mut self, outcome: StageOutcome) {
        tracing::info!(
            run_id = %self.run_id,
            stage = %outcome.stage,
            status = %outcome.status,
            duration_ms = outcome.duration_ms,
            "Stage completed"
        );
        match self.stages.iter_mut().find(|o| o.stage == outcome.stage) {
            Some(existing) => *existing = outcome,
            None => self.stages.push(outcome),
        }
    }

    /// Outcome recorded for `stage`.
    pub fn stage_outcome(&self, stage: StageName) -> Option<&StageOutcome> {
        self.stages.iter().find(|o| o.stage == stage)
    }

    /// Copy of all stage outcomes in recording order.
    pub fn stage_results(&self) -> Vec<StageOutcome> {
        self.stages.clone()
    }

    /// Stores `value` under `key`; the last write wins.
    pub fn set_data(&mut self, key: DataKey, value: impl Into<Value>) {
        self.data.insert(key, value.into());
    }

    /// Serializes `value` and stores it under `key`.
    ///
    /// # Errors
    ///
    /// Returns the serialization error; the context is unchanged in that case.
    pub fn set_serialized<T: Serialize>(
        &mut self,
        key: DataKey,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key, value);
        Ok(())
    }

    pub fn get_data(&self, key: DataKey) -> Option<&Value> {
        self.data.get(&key)
    }

    /// String value under `key`, if one is present.
    pub fn get_str(&self, key: DataKey) -> Option<&str> {
        self.data.get(&key).and_then(Value::as_str)
    }

    /// Deserializes the value under `key`. Absent or mismatched values give `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: DataKey) -> Option<T> {
        self.data
            .get(&key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Copy of the data store keyed by wire name.
    pub fn data_snapshot(&self) -> BTreeMap<String, Value> {
        self.data
            .iter()
            .map(|(key, value)| (key.as_str().to_string(), value.clone()))
            .collect()
    }

    pub fn record_metric(&mut self, key: impl Into<String>, value: f64) {
        self.metrics.insert(key.into(), value);
    }

    /// Copy of the metric observations.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        self.metrics.clone()
    }

    /// Time since the context was created.
    pub fn total_duration(&self) -> Duration {
        self.start.elapsed()
    }

    /// Final code: optimized output wins over the extracted code.
    pub fn final_code(&self) -> Option<&str> {
        self.get_str(DataKey::OptimizedCode)
            .or_else(|| self.get_str(DataKey::ExtractedCode))
    }
}
