//! CLI command definitions for codeforge.
//!
//! `run` drives a prompt through the full pipeline and prints the result as
//! JSON, `health` probes the configured model backend and `test` executes a
//! code file against a test file without involving a model.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::language::{normalize_language, DEFAULT_LANGUAGE, KNOWN_LANGUAGES};
use crate::llm::{DeploymentMode, ModelConfig};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{PipelineConfig, PipelineOptions, PipelineRequest, PipelineService};
use crate::testing::{TestRunner, TestRunnerConfig};

/// Prompt-to-code generation pipeline.
#[derive(Parser)]
#[command(name = "codeforge")]
#[command(about = "Generate, clean up, test and store code from natural-language prompts")]
#[command(version)]
#[command(
    long_about = "codeforge sends a prompt to a generative model, extracts and tidies the code it returns, checks it, optionally runs it against a test suite and stores the result as an artifact.\n\nBackend selection and limits come from CODEFORGE_* environment variables.\n\nExample usage:\n  codeforge run \"add two numbers in python\" --stub\n  codeforge run \"fizzbuzz\" --language ruby --test-suite fizzbuzz"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a prompt through the generation pipeline.
    #[command(alias = "gen")]
    Run(RunArgs),

    /// Check that the configured model backend responds.
    Health(HealthArgs),

    /// Execute a code file against a test file.
    Test(TestArgs),
}

/// Backend selection shared by commands that talk to a model.
#[derive(clap::Args, Debug, Clone)]
pub struct BackendArgs {
    /// Use the offline stub backend regardless of environment settings.
    #[arg(long, env = "USE_STUB_MODEL", value_parser = clap::builder::BoolishValueParser::new())]
    pub stub: bool,

    /// Deployment mode (api, local, vertex, hf, stub); overrides CODEFORGE_DEPLOYMENT_MODE.
    #[arg(long)]
    pub mode: Option<DeploymentMode>,
}

/// Arguments for `codeforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Natural-language description of the code to generate.
    pub prompt: String,

    /// Target language; detected from the prompt when omitted.
    #[arg(short = 'L', long)]
    pub language: Option<String>,

    /// Model identifier passed to the backend.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Test suite to run the generated code against.
    #[arg(short = 's', long)]
    pub test_suite: Option<String>,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Maximum tokens to generate.
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling cutoff.
    #[arg(long)]
    pub top_p: Option<f64>,

    /// Keep the extracted code as-is.
    #[arg(long)]
    pub skip_optimization: bool,

    /// Skip static checks.
    #[arg(long)]
    pub skip_validation: bool,

    /// Skip test execution even when a suite is given.
    #[arg(long)]
    pub skip_testing: bool,

    /// Directory for stored artifacts (overrides ARTIFACT_STORAGE_PATH).
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// Directory holding test suites (overrides CODEFORGE_TEST_SUITE_PATH).
    #[arg(long)]
    pub suites: Option<PathBuf>,

    /// Print the generated code only instead of the full JSON result.
    #[arg(long)]
    pub code_only: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,

    /// Write the JSON result to this file as well.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub backend: BackendArgs,
}

/// Arguments for `codeforge health`.
#[derive(Parser, Debug)]
pub struct HealthArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Output JSON instead of a status line.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `codeforge test`.
#[derive(Parser, Debug)]
pub struct TestArgs {
    /// File containing the code under test.
    pub code: PathBuf,

    /// File containing the test code.
    pub tests: PathBuf,

    /// Language of both files; inferred from the code file's extension when omitted.
    #[arg(short = 'L', long)]
    pub language: Option<String>,

    /// Wall-clock limit in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,
}

/// Health report printed by `codeforge health --json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    healthy: bool,
    mode: String,
    backend: String,
    model: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Health(args) => run_health_command(args).await,
        Commands::Test(args) => run_test_command(args).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Environment configuration, or the offline stub configuration.
fn load_config(backend: &BackendArgs) -> anyhow::Result<PipelineConfig> {
    if backend.stub {
        info!("Using stub model backend");
        return Ok(PipelineConfig::stub());
    }
    PipelineConfig::from_env_with_mode(backend.mode).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration: {}. \
             Set the backend credentials or pass --stub for an offline run.",
            e
        )
    })
}

fn build_request(args: &RunArgs) -> PipelineRequest {
    let mut request = PipelineRequest::new(args.prompt.clone()).with_options(PipelineOptions {
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        top_p: args.top_p,
        skip_optimization: args.skip_optimization,
        skip_validation: args.skip_validation,
        skip_testing: args.skip_testing,
    });
    if let Some(language) = &args.language {
        request = request.with_language(language.clone());
    }
    if let Some(model) = &args.model {
        request = request.with_model(model.clone());
    }
    if let Some(suite) = &args.test_suite {
        request = request.with_test_suite(suite.clone());
    }
    request
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    if args.metrics {
        init_metrics().map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;
    }

    let mut config = load_config(&args.backend)?;
    if let Some(path) = &args.artifacts {
        config = config.with_artifact_path(path.clone());
    }
    if let Some(path) = &args.suites {
        config = config.with_test_suite_path(path.clone());
    }

    let service = PipelineService::from_config(&config)?;
    let result = service.submit(build_request(&args)).await;

    let json_output = serde_json::to_string_pretty(&result)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;

    if let Some(output_path) = &args.output {
        fs::write(output_path, &json_output)
            .map_err(|e| anyhow::anyhow!("Failed to write output file: {}", e))?;
        info!(path = %output_path.display(), "Result written to file");
    }

    if args.code_only {
        println!("{}", result.code);
    } else {
        println!("{}", json_output);
    }

    if args.metrics {
        print!("{}", export_metrics());
    }

    if !result.is_success() {
        return Err(anyhow::anyhow!(
            "Pipeline run {} failed: {}",
            result.run_id,
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

async fn run_health_command(args: HealthArgs) -> anyhow::Result<()> {
    let config = load_config(&args.backend)?;
    let service = PipelineService::from_config(&config)?;

    let healthy = service.health().await;
    let model: &ModelConfig = &config.model;
    let report = HealthReport {
        healthy,
        mode: model.mode.to_string(),
        backend: service.runner().adapter().backend_name().to_string(),
        model: model.model_name.clone(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} ({} / {}): {}",
            report.backend,
            report.mode,
            report.model,
            if healthy { "healthy" } else { "unhealthy" }
        );
    }

    if !healthy {
        return Err(anyhow::anyhow!("Model backend is not healthy"));
    }
    Ok(())
}

async fn run_test_command(args: TestArgs) -> anyhow::Result<()> {
    let code = fs::read_to_string(&args.code).map_err(|e| {
        anyhow::anyhow!("Failed to read code file {}: {}", args.code.display(), e)
    })?;
    let tests = fs::read_to_string(&args.tests).map_err(|e| {
        anyhow::anyhow!("Failed to read test file {}: {}", args.tests.display(), e)
    })?;

    let language = match &args.language {
        Some(language) => normalize_language(language),
        None => language_from_path(&args.code).unwrap_or_else(|| {
            warn!(
                path = %args.code.display(),
                default = DEFAULT_LANGUAGE,
                "Could not infer language from file name"
            );
            DEFAULT_LANGUAGE.to_string()
        }),
    };

    let runner = TestRunner::new(TestRunnerConfig {
        timeout: Duration::from_millis(args.timeout_ms),
        ..TestRunnerConfig::default()
    });
    let result = runner.run(&code, &language, &tests).await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.all_passed() {
        return Err(anyhow::anyhow!(
            "{} of {} tests failed",
            result.failed,
            result.total
        ));
    }
    Ok(())
}

/// Language named by a file's extension, if it is one we know.
fn language_from_path(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?;
    let language = normalize_language(extension);
    KNOWN_LANGUAGES
        .contains(&language.as_str())
        .then_some(language)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let cli = Cli::try_parse_from(["codeforge", "run", "add two numbers"]).expect("should parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.prompt, "add two numbers");
                assert!(args.language.is_none());
                assert!(args.test_suite.is_none());
                assert!(!args.skip_testing);
                assert!(!args.code_only);
            }
            _ => panic!("Expected Run command"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_run_command_with_options() {
        let cli = Cli::try_parse_from([
            "codeforge",
            "run",
            "fizzbuzz",
            "-L",
            "ruby",
            "-s",
            "fizzbuzz",
            "--temperature",
            "0.2",
            "--max-tokens",
            "256",
            "--skip-validation",
            "--stub",
            "--log-level",
            "debug",
        ])
        .expect("should parse");

        assert_eq!(cli.log_level, "debug");
        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        assert!(args.backend.stub);

        let request = build_request(&args);
        assert_eq!(request.language.as_deref(), Some("ruby"));
        assert_eq!(request.test_suite_id.as_deref(), Some("fizzbuzz"));
        assert_eq!(request.options.temperature, Some(0.2));
        assert_eq!(request.options.max_tokens, Some(256));
        assert!(request.options.skip_validation);
        assert!(!request.options.skip_optimization);
    }

    #[test]
    fn test_health_mode_flag() {
        let cli = Cli::try_parse_from(["codeforge", "health", "--mode", "local", "-j"])
            .expect("should parse");
        let Commands::Health(args) = cli.command else {
            panic!("Expected Health command");
        };
        assert_eq!(args.backend.mode, Some(DeploymentMode::Local));
        assert!(args.json);

        assert!(Cli::try_parse_from(["codeforge", "health", "--mode", "cloud"]).is_err());
    }

    #[test]
    fn test_gen_alias() {
        let cli = Cli::try_parse_from(["codeforge", "gen", "hello"]).expect("should parse");
        assert!(matches!(cli.command, Commands::Run(_)));
    }

    #[test]
    fn test_run_requires_prompt() {
        assert!(Cli::try_parse_from(["codeforge", "run"]).is_err());
    }

    #[test]
    fn test_test_command() {
        let cli = Cli::try_parse_from(["codeforge", "test", "add.py", "add_test.py"])
            .expect("should parse");
        let Commands::Test(args) = cli.command else {
            panic!("Expected Test command");
        };
        assert_eq!(args.code, PathBuf::from("add.py"));
        assert_eq!(args.timeout_ms, 10_000);
    }

    #[test]
    fn test_language_from_path() {
        assert_eq!(
            language_from_path(Path::new("solution.py")).as_deref(),
            Some("python")
        );
        assert_eq!(
            language_from_path(Path::new("main.rs")).as_deref(),
            Some("rust")
        );
        assert!(language_from_path(Path::new("Makefile")).is_none());
    }

    #[tokio::test]
    async fn test_stub_run_command_writes_output() {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let output = dir.path().join("result.json");
        let artifacts = dir.path().join("artifacts");
        let cli = Cli::try_parse_from([
            "codeforge",
            "run",
            "add two numbers in python",
            "--stub",
            "--artifacts",
            artifacts.to_str().expect("utf-8 path"),
            "-o",
            output.to_str().expect("utf-8 path"),
        ])
        .expect("should parse");

        run_with_cli(cli).await.expect("stub run succeeds");

        let written = fs::read_to_string(&output).expect("output written");
        let value: serde_json::Value = serde_json::from_str(&written).expect("valid json");
        assert_eq!(value["status"], "success");
        assert_eq!(value["language"], "python");
    }
}
