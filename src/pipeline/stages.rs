//! The seven pipeline stages.
//!
//! Each stage is a function of the run context plus, at most, one
//! collaborator. A stage returns optional structured data for its outcome
//! record; the runner does the timing and the bookkeeping.

use serde_json::{json, Value};

use super::context::{DataKey, PipelineContext};
use super::types::{PipelineRequest, StageName};
use crate::error::StageError;
use crate::language::{detect_in_prompt, normalize_language, DEFAULT_LANGUAGE};
use crate::llm::{estimate_tokens, GenerateRequest, ModelAdapter, RetryPolicy};
use crate::postprocess::{extract_explanation, optimize, validate, CodeExtractor, Severity};
use crate::prompts::{build_generation_prompt, infer_intent};
use crate::storage::{ArtifactKind, ArtifactStore};
use crate::testing::{TestRunner, TestSuiteSource};

/// Prompts longer than this are accepted but logged.
pub const PROMPT_WARN_CHARS: usize = 5000;

/// What a stage hands back for its outcome record.
pub type StageResult = Result<Option<Value>, StageError>;

/// Sampling and language defaults applied when a request leaves them unset.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub language: String,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 0.95,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// Why `stage` should not run for `request`, if it should not.
pub fn skip_reason(stage: StageName, request: &PipelineRequest) -> Option<&'static str> {
    let options = &request.options;
    match stage {
        StageName::Optimization if options.skip_optimization => Some("skipOptimization set"),
        StageName::Validation if options.skip_validation => Some("skipValidation set"),
        StageName::Testing if options.skip_testing => Some("skipTesting set"),
        StageName::Testing if request.test_suite_id.is_none() => Some("no test suite given"),
        _ => None,
    }
}

fn current_language(ctx: &PipelineContext) -> String {
    ctx.get_str(DataKey::Language)
        .unwrap_or(DEFAULT_LANGUAGE)
        .to_string()
}

fn current_code(ctx: &PipelineContext) -> Result<String, StageError> {
    ctx.final_code()
        .map(str::to_string)
        .ok_or_else(|| StageError::Extraction("No code available from earlier stages".to_string()))
}

/// Resolves the target language: the request's, else one named in the
/// prompt, else the default.
pub fn resolve_language(request: &PipelineRequest, default_language: &str) -> String {
    request
        .language
        .as_deref()
        .filter(|lang| !lang.trim().is_empty())
        .map(normalize_language)
        .or_else(|| detect_in_prompt(&request.prompt))
        .unwrap_or_else(|| default_language.to_string())
}

/// Rejects empty prompts; records the trimmed prompt, token estimate,
/// language and the templated prompt the model will receive.
pub fn preprocess(ctx: &mut PipelineContext, defaults: &GenerationDefaults) -> StageResult {
    let prompt = ctx.request().prompt.clone();
    if prompt.trim().is_empty() {
        return Err(StageError::InvalidInput("Prompt cannot be empty".to_string()));
    }

    let length = prompt.chars().count();
    if length > PROMPT_WARN_CHARS {
        tracing::warn!(
            run_id = %ctx.run_id(),
            length = length,
            "Prompt exceeds {} characters",
            PROMPT_WARN_CHARS
        );
    }

    let estimated_tokens = estimate_tokens(&prompt);
    let task = prompt.trim();
    let language = resolve_language(ctx.request(), &defaults.language);
    let intent = infer_intent(task);
    let model_prompt = build_generation_prompt(task, &language, &intent.constraints);

    ctx.set_data(DataKey::ProcessedPrompt, task);
    ctx.set_data(DataKey::ModelPrompt, model_prompt);
    ctx.set_data(DataKey::EstimatedTokens, estimated_tokens);
    ctx.set_data(DataKey::Language, language.clone());

    Ok(Some(json!({
        "estimatedTokens": estimated_tokens,
        "language": language,
        "intent": intent.intent,
        "constraints": intent.constraints,
    })))
}

/// Calls the model through the retry policy and records its output.
pub async fn invoke_model(
    ctx: &mut PipelineContext,
    adapter: &ModelAdapter,
    retry: &RetryPolicy,
    defaults: &GenerationDefaults,
) -> StageResult {
    let prompt = ctx
        .get_str(DataKey::ModelPrompt)
        .ok_or_else(|| StageError::InvalidInput("No model prompt".to_string()))?
        .to_string();

    let options = &ctx.request().options;
    let mut request = GenerateRequest::new(prompt)
        .with_max_tokens(options.max_tokens.unwrap_or(defaults.max_tokens))
        .with_temperature(options.temperature.unwrap_or(defaults.temperature))
        .with_top_p(options.top_p.unwrap_or(defaults.top_p));
    if let Some(model) = &ctx.request().model {
        request = request.with_model(model.clone());
    }

    tracing::info!(
        run_id = %ctx.run_id(),
        backend = adapter.backend_name(),
        "Invoking model"
    );

    let mut attempts: u32 = 0;
    let response = retry
        .run(|| {
            attempts += 1;
            adapter.generate(&request)
        })
        .await?;

    ctx.set_data(DataKey::RawModelOutput, response.text.clone());
    ctx.set_data(DataKey::FinishReason, response.finish_reason.as_str());
    ctx.record_metric("inputTokens", f64::from(response.usage.input_tokens));
    ctx.record_metric("outputTokens", f64::from(response.usage.output_tokens));
    ctx.record_metric("modelAttempts", f64::from(attempts));

    Ok(Some(json!({
        "tokens": response.usage.total(),
        "finishReason": response.finish_reason.as_str(),
        "attempts": attempts,
    })))
}

/// Pulls the code out of the raw model text.
pub fn normalize(ctx: &mut PipelineContext, extractor: &dyn CodeExtractor) -> StageResult {
    let raw = ctx.get_str(DataKey::RawModelOutput).unwrap_or_default();

    let extracted = extractor
        .extract(raw)
        .ok_or_else(|| StageError::Extraction("No code extracted from model output".to_string()))?;

    let explanation = extract_explanation(raw);
    let code_length = extracted.code.chars().count();
    ctx.set_data(DataKey::ExtractedCode, extracted.code);
    if let Some(explanation) = &explanation {
        ctx.set_data(DataKey::Explanation, explanation.clone());
    }
    if let Some(detected) = &extracted.language {
        ctx.set_data(DataKey::DetectedLanguage, detected.clone());
    }
    ctx.record_metric("codeLength", code_length as f64);

    Ok(Some(json!({
        "codeLength": code_length,
        "detectedLanguage": extracted.language,
        "hasExplanation": explanation.is_some(),
    })))
}

/// Whitespace cleanup plus complexity and duplication analysis.
pub fn optimize_code(ctx: &mut PipelineContext) -> StageResult {
    let code = ctx
        .get_str(DataKey::ExtractedCode)
        .ok_or_else(|| StageError::Optimization("No extracted code".to_string()))?
        .to_string();
    let language = current_language(ctx);

    let (optimized, report) = optimize(&code, &language)?;

    ctx.set_serialized(DataKey::OptimizationReport, &report)?;
    ctx.set_data(DataKey::OptimizedCode, optimized);
    ctx.record_metric("optimizedLength", report.optimized_length as f64);

    Ok(Some(json!({
        "changed": report.changed,
        "timeComplexity": report.complexity.time_complexity,
        "suggestions": report.complexity.suggestions.len(),
        "duplicates": report.duplicates.duplicate_count,
    })))
}

/// Lint and structural checks. Fails when any error-severity issue is found.
pub fn validate_code(ctx: &mut PipelineContext) -> StageResult {
    let code = current_code(ctx)?;
    let language = current_language(ctx);

    let report = validate(&code, &language);
    ctx.set_serialized(DataKey::ValidationIssues, &report.issues)?;
    ctx.record_metric("issueCount", report.issues.len() as f64);

    if !report.passed() {
        let first = report
            .issues
            .iter()
            .find(|issue| issue.severity == Severity::Error)
            .map(|issue| issue.message.clone())
            .unwrap_or_default();
        return Err(StageError::Validation(format!(
            "{} error(s), first: {}",
            report.error_count(),
            first
        )));
    }

    Ok(Some(json!({
        "issues": report.issues.len(),
        "warnings": report.warning_count(),
    })))
}

/// Runs the code against the request's test suite.
pub async fn run_tests(
    ctx: &mut PipelineContext,
    suites: &dyn TestSuiteSource,
    runner: &TestRunner,
) -> StageResult {
    let suite_id = ctx
        .request()
        .test_suite_id
        .clone()
        .ok_or_else(|| StageError::TestSuite("No test suite given".to_string()))?;
    let code = current_code(ctx)?;
    let language = current_language(ctx);

    let test_code = suites.load(&suite_id, &language).await?;
    let result = runner.run(&code, &language, &test_code).await;

    ctx.set_serialized(DataKey::TestResult, &result)?;
    ctx.record_metric("testsPassed", f64::from(result.passed));
    ctx.record_metric("testsFailed", f64::from(result.failed));

    tracing::info!(
        run_id = %ctx.run_id(),
        suite_id = %suite_id,
        passed = result.passed,
        failed = result.failed,
        duration_ms = result.duration_ms,
        "Test suite finished"
    );

    if result.failed > 0 {
        return Err(StageError::TestsFailed {
            failed: result.failed,
            total: result.total,
        });
    }

    Ok(Some(json!({
        "suiteId": suite_id,
        "passed": result.passed,
        "failed": result.failed,
        "total": result.total,
    })))
}

/// Persists the final code and records the artifact id.
pub async fn package(ctx: &mut PipelineContext, store: &dyn ArtifactStore) -> StageResult {
    let code = current_code(ctx)?;
    let language = current_language(ctx);

    let artifact = store
        .store_artifact(&code, ArtifactKind::Code, &language)
        .await?;
    ctx.set_data(DataKey::CodeArtifactId, artifact.id.clone());

    Ok(Some(json!({
        "artifactId": artifact.id,
        "location": artifact.location,
        "size": artifact.size,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::PipelineOptions;
    use crate::postprocess::FencedCodeExtractor;
    use crate::storage::MemoryArtifactStore;
    use crate::testing::StaticSuiteSource;

    fn ctx_with(prompt: &str) -> PipelineContext {
        PipelineContext::new(PipelineRequest::new(prompt))
    }

    #[test]
    fn test_preprocess_estimates_tokens() {
        for prompt in ["a", "abcd", "abcde", "add two numbers in python", "  padded  "] {
            let mut ctx = ctx_with(prompt);
            preprocess(&mut ctx, &GenerationDefaults::default()).expect("non-empty prompt");
            let expected = (prompt.chars().count() as u64).div_ceil(4);
            assert_eq!(
                ctx.get_as::<u64>(DataKey::EstimatedTokens),
                Some(expected),
                "prompt {:?}",
                prompt
            );
        }
    }

    #[test]
    fn test_preprocess_trims_prompt() {
        let mut ctx = ctx_with("  write a parser \n");
        preprocess(&mut ctx, &GenerationDefaults::default()).expect("valid");
        assert_eq!(
            ctx.get_str(DataKey::ProcessedPrompt),
            Some("write a parser")
        );
    }

    #[test]
    fn test_preprocess_builds_model_prompt() {
        let mut ctx = PipelineContext::new(
            PipelineRequest::new(" find duplicate ids ").with_language("sh"),
        );
        let data = preprocess(&mut ctx, &GenerationDefaults::default())
            .expect("valid")
            .expect("data");

        let model_prompt = ctx.get_str(DataKey::ModelPrompt).expect("templated");
        assert!(model_prompt.contains("TASK:\nfind duplicate ids\n"));
        assert!(model_prompt.contains("LANGUAGE:\nbash\n"));
        assert!(model_prompt.contains("- Optimize for O(n) time"));
        assert!(model_prompt.contains("<CODE>"));
        assert_eq!(data["intent"], "find_duplicates");
    }

    #[test]
    fn test_normalize_records_explanation() {
        let mut ctx = ctx_with("x");
        ctx.set_data(
            DataKey::RawModelOutput,
            "<CODE>\nputs 1\n</CODE>\n<EXPLANATION>\nPrints one.\n</EXPLANATION>",
        );
        let data = normalize(&mut ctx, &FencedCodeExtractor)
            .expect("code present")
            .expect("data");

        assert_eq!(ctx.get_str(DataKey::ExtractedCode), Some("puts 1"));
        assert_eq!(ctx.get_str(DataKey::Explanation), Some("Prints one."));
        assert_eq!(data["hasExplanation"], true);
    }

    #[test]
    fn test_preprocess_rejects_blank_prompts() {
        for prompt in ["", "   ", "\n\t"] {
            let mut ctx = ctx_with(prompt);
            let err = preprocess(&mut ctx, &GenerationDefaults::default())
                .expect_err("blank prompt");
            assert!(matches!(err, StageError::InvalidInput(_)));
            assert_eq!(err.to_string(), "Prompt cannot be empty");
            assert!(ctx.get_data(DataKey::ProcessedPrompt).is_none());
        }
    }

    #[test]
    fn test_language_resolution_order() {
        let defaults = GenerationDefaults::default();

        let explicit = PipelineRequest::new("add two numbers in python").with_language("ts");
        assert_eq!(resolve_language(&explicit, &defaults.language), "typescript");

        let mentioned = PipelineRequest::new("add two numbers in python");
        assert_eq!(resolve_language(&mentioned, &defaults.language), "python");

        let neither = PipelineRequest::new("add two numbers");
        assert_eq!(resolve_language(&neither, &defaults.language), "javascript");

        let blank = PipelineRequest::new("add two numbers").with_language(" ");
        assert_eq!(resolve_language(&blank, "ruby"), "ruby");
    }

    #[test]
    fn test_skip_reasons() {
        let request = PipelineRequest::new("x");
        assert_eq!(
            skip_reason(StageName::Testing, &request),
            Some("no test suite given")
        );
        assert_eq!(skip_reason(StageName::Optimization, &request), None);

        let with_suite = PipelineRequest::new("x")
            .with_test_suite("add")
            .with_options(PipelineOptions {
                skip_testing: true,
                skip_validation: true,
                ..PipelineOptions::default()
            });
        assert_eq!(
            skip_reason(StageName::Testing, &with_suite),
            Some("skipTesting set")
        );
        assert!(skip_reason(StageName::Validation, &with_suite).is_some());

        for stage in [
            StageName::Preprocessing,
            StageName::ModelInvocation,
            StageName::Normalization,
            StageName::Packaging,
        ] {
            let all_skips = PipelineRequest::new("x").with_options(PipelineOptions {
                skip_optimization: true,
                skip_validation: true,
                skip_testing: true,
                ..PipelineOptions::default()
            });
            assert_eq!(skip_reason(stage, &all_skips), None);
        }
    }

    #[tokio::test]
    async fn test_invoke_model_records_output() {
        let mut ctx = ctx_with("add two numbers in python");
        preprocess(&mut ctx, &GenerationDefaults::default()).expect("valid");

        let data = invoke_model(
            &mut ctx,
            &ModelAdapter::stub(),
            &RetryPolicy::default(),
            &GenerationDefaults::default(),
        )
        .await
        .expect("stub succeeds")
        .expect("data recorded");

        assert!(ctx
            .get_str(DataKey::RawModelOutput)
            .is_some_and(|text| text.contains("def add")));
        assert_eq!(ctx.get_str(DataKey::FinishReason), Some("STOP"));
        assert_eq!(data["attempts"], 1);
        assert_eq!(ctx.metrics()["modelAttempts"], 1.0);
    }

    #[test]
    fn test_normalize_fails_without_code() {
        let mut ctx = ctx_with("x");
        ctx.set_data(DataKey::RawModelOutput, "```python\n```");
        let err = normalize(&mut ctx, &FencedCodeExtractor).expect_err("empty fence");
        assert_eq!(err.to_string(), "No code extracted from model output");
    }

    #[test]
    fn test_normalize_records_detected_language() {
        let mut ctx = ctx_with("x");
        ctx.set_data(
            DataKey::RawModelOutput,
            "Here you go:\n```py\nprint(1)\n```\n",
        );
        normalize(&mut ctx, &FencedCodeExtractor).expect("code present");
        assert_eq!(ctx.get_str(DataKey::ExtractedCode), Some("print(1)"));
        assert_eq!(ctx.get_str(DataKey::DetectedLanguage), Some("python"));
        assert_eq!(ctx.metrics()["codeLength"], 8.0);
    }

    #[test]
    fn test_optimize_code_sets_optimized_and_report() {
        let mut ctx = ctx_with("x");
        ctx.set_data(DataKey::Language, "python");
        ctx.set_data(DataKey::ExtractedCode, "x = 1   \n\n\n\ny = 2");
        optimize_code(&mut ctx).expect("cleanup succeeds");

        assert_eq!(ctx.get_str(DataKey::OptimizedCode), Some("x = 1\n\n\ny = 2\n"));
        assert!(ctx.get_data(DataKey::OptimizationReport).is_some());
    }

    #[test]
    fn test_optimize_code_failure_leaves_no_optimized_code() {
        let mut ctx = ctx_with("x");
        ctx.set_data(DataKey::ExtractedCode, "   \n  ");
        assert!(optimize_code(&mut ctx).is_err());
        assert!(ctx.get_data(DataKey::OptimizedCode).is_none());
    }

    #[test]
    fn test_validate_code_fails_on_errors() {
        let mut ctx = ctx_with("x");
        ctx.set_data(DataKey::Language, "javascript");
        ctx.set_data(DataKey::ExtractedCode, "function f() {\n  return [1, 2;\n}\n");

        let err = validate_code(&mut ctx).expect_err("unbalanced");
        assert!(matches!(err, StageError::Validation(_)));
        assert!(ctx.get_data(DataKey::ValidationIssues).is_some());
    }

    #[test]
    fn test_validate_code_passes_with_warnings() {
        let mut ctx = ctx_with("x");
        ctx.set_data(DataKey::Language, "python");
        ctx.set_data(DataKey::ExtractedCode, "def solve():\n    # TODO: implement\n    pass\n");

        let data = validate_code(&mut ctx).expect("warnings only").expect("data");
        assert_eq!(data["warnings"], 1);
    }

    #[tokio::test]
    async fn test_run_tests_counts() {
        let mut ctx = PipelineContext::new(PipelineRequest::new("x").with_test_suite("greet"));
        ctx.set_data(DataKey::Language, "bash");
        ctx.set_data(DataKey::ExtractedCode, "greet() { echo \"hi $1\"; }");

        let suites = StaticSuiteSource::new().with_suite(
            "greet",
            "[ \"$(greet bob)\" = \"hi bob\" ] && echo PASS greet || echo FAIL greet",
        );
        let data = run_tests(&mut ctx, &suites, &TestRunner::default())
            .await
            .expect("suite passes")
            .expect("data");

        assert_eq!(data["passed"], 1);
        assert_eq!(data["failed"], 0);
        assert_eq!(ctx.metrics()["testsPassed"], 1.0);
    }

    #[tokio::test]
    async fn test_run_tests_unknown_suite() {
        let mut ctx = PipelineContext::new(PipelineRequest::new("x").with_test_suite("missing"));
        ctx.set_data(DataKey::ExtractedCode, "echo hi");

        let err = run_tests(&mut ctx, &StaticSuiteSource::new(), &TestRunner::default())
            .await
            .expect_err("no such suite");
        assert!(matches!(err, StageError::TestSuite(_)));
        assert!(ctx.get_data(DataKey::TestResult).is_none());
    }

    #[tokio::test]
    async fn test_package_stores_final_code() {
        let store = MemoryArtifactStore::new();
        let mut ctx = ctx_with("x");
        ctx.set_data(DataKey::Language, "python");
        ctx.set_data(DataKey::ExtractedCode, "raw");
        ctx.set_data(DataKey::OptimizedCode, "clean\n");

        package(&mut ctx, &store).await.expect("memory store");

        let artifact_id = ctx
            .get_str(DataKey::CodeArtifactId)
            .expect("artifact recorded")
            .to_string();
        assert_eq!(store.retrieve(&artifact_id).await.expect("stored"), "clean\n");
    }
}
