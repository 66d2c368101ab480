//! Pipeline configuration.
//!
//! This module gathers every tunable of a pipeline deployment: the model
//! backend, quota and retry settings, generation defaults, test execution
//! limits, storage paths and run retention.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::stages::GenerationDefaults;
use super::store::{DEFAULT_RUN_STORE_CAPACITY, DEFAULT_RUN_TTL};
use crate::language::DEFAULT_LANGUAGE;
use crate::llm::{DeploymentMode, ModelConfig, RateLimitConfig, RetryConfig};
use crate::testing::TestRunnerConfig;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for a pipeline deployment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Model settings
    /// Backend selection and connection settings.
    pub model: ModelConfig,
    /// Requests/tokens per window for the adapter's rate limiter.
    pub rate_limits: RateLimitConfig,
    /// Backoff applied by the model-invocation stage.
    pub retry: RetryConfig,

    // Generation defaults
    /// Language used when neither request nor prompt names one.
    pub default_language: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,

    // Test execution
    pub test_timeout: Duration,
    pub test_max_output_bytes: usize,

    // Storage
    /// Directory for stored artifacts.
    pub artifact_path: PathBuf,
    /// Directory holding test suites.
    pub test_suite_path: PathBuf,

    // Run retention
    pub run_ttl: Duration,
    pub run_store_capacity: usize,
    /// Maximum runs executed at once by a batch submission.
    pub max_concurrent_runs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let defaults = GenerationDefaults::default();
        let test = TestRunnerConfig::default();
        Self {
            model: ModelConfig::default(),
            rate_limits: RateLimitConfig::default(),
            retry: RetryConfig::default(),

            default_language: DEFAULT_LANGUAGE.to_string(),
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            top_p: defaults.top_p,

            test_timeout: test.timeout,
            test_max_output_bytes: test.max_output_bytes,

            artifact_path: PathBuf::from("./artifacts"),
            test_suite_path: PathBuf::from("./test-suites"),

            run_ttl: DEFAULT_RUN_TTL,
            run_store_capacity: DEFAULT_RUN_STORE_CAPACITY,
            max_concurrent_runs: 4,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offline configuration: stub backend, everything else default.
    pub fn stub() -> Self {
        Self::default().with_model(ModelConfig::stub())
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CODEFORGE_DEPLOYMENT_MODE`: `api`, `local`, `vertex`, `hf` or `stub` (default: api)
    /// - `USE_STUB_MODEL`: when truthy, forces the stub backend
    /// - `CODEFORGE_MODEL_NAME`: Model identifier (default: per mode)
    /// - `CODEFORGE_API_KEY` / `GEMINI_API_KEY`: Direct-API key
    /// - `HF_API_TOKEN`: Hosted-inference token
    /// - `VERTEX_ACCESS_TOKEN`, `VERTEX_PROJECT`, `VERTEX_LOCATION`: Managed-cloud settings
    /// - `CODEFORGE_BASE_URL`: Backend base URL override
    /// - `CODEFORGE_MODEL_TIMEOUT_MS`: Per-call deadline (default: 30000)
    /// - `CODEFORGE_REQUESTS_PER_MINUTE`: Request quota (default: 60)
    /// - `CODEFORGE_TOKENS_PER_MINUTE`: Token quota (default: 90000)
    /// - `CODEFORGE_MAX_RETRIES`: Retries after the first attempt (default: 3)
    /// - `CODEFORGE_RETRY_INITIAL_DELAY_MS` / `CODEFORGE_RETRY_MAX_DELAY_MS`: Backoff bounds (default: 1000 / 10000)
    /// - `CODEFORGE_RETRY_BACKOFF_MULTIPLIER`: Backoff factor (default: 2.0)
    /// - `CODEFORGE_DEFAULT_LANGUAGE`: Fallback language (default: javascript)
    /// - `CODEFORGE_MAX_TOKENS`, `CODEFORGE_TEMPERATURE`, `CODEFORGE_TOP_P`: Sampling defaults
    /// - `CODEFORGE_TEST_TIMEOUT_MS`: Test wall-clock limit (default: 10000)
    /// - `CODEFORGE_TEST_MAX_OUTPUT_BYTES`: Captured output cap (default: 10 MiB)
    /// - `ARTIFACT_STORAGE_PATH`: Artifact directory (default: ./artifacts)
    /// - `CODEFORGE_TEST_SUITE_PATH`: Test suite directory (default: ./test-suites)
    /// - `CODEFORGE_RUN_TTL_SECS`: Result retention (default: 3600)
    /// - `CODEFORGE_RUN_STORE_CAPACITY`: Retained results (default: 1000)
    /// - `CODEFORGE_MAX_CONCURRENT_RUNS`: Batch concurrency (default: 4)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value, a backend's
    /// credentials are missing, or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_mode(None)
    }

    /// Like [`from_env`](Self::from_env), but `mode` (when given) takes
    /// precedence over `CODEFORGE_DEPLOYMENT_MODE` and `USE_STUB_MODEL`.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_env_with_mode(mode: Option<DeploymentMode>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Model settings
        let mode = match mode {
            Some(mode) => mode,
            None => mode_from_env()?,
        };

        let mut model = ModelConfig::new(mode);
        if let Some(val) = env("CODEFORGE_MODEL_NAME") {
            model = model.with_model(val);
        }
        if let Some(key) = credential_for(mode) {
            model = model.with_api_key(key);
        }
        if let Some(val) = env("CODEFORGE_BASE_URL") {
            model = model.with_base_url(val);
        }
        if let Some(val) = env("CODEFORGE_MODEL_TIMEOUT_MS") {
            let ms: u64 = parse_env_value(&val, "CODEFORGE_MODEL_TIMEOUT_MS")?;
            model = model.with_timeout(Duration::from_millis(ms));
        }
        if mode == DeploymentMode::ManagedCloud {
            let project = env("VERTEX_PROJECT")
                .ok_or_else(|| ConfigError::MissingEnvVar("VERTEX_PROJECT".to_string()))?;
            let location = env("VERTEX_LOCATION").unwrap_or_else(|| model.location.clone());
            model = model.with_project(project, location);
        }
        match mode {
            DeploymentMode::DirectApi if model.api_key.is_none() => {
                return Err(ConfigError::MissingEnvVar(
                    "CODEFORGE_API_KEY or GEMINI_API_KEY".to_string(),
                ))
            }
            DeploymentMode::HostedInference if model.api_key.is_none() => {
                return Err(ConfigError::MissingEnvVar("HF_API_TOKEN".to_string()))
            }
            DeploymentMode::ManagedCloud if model.api_key.is_none() => {
                return Err(ConfigError::MissingEnvVar("VERTEX_ACCESS_TOKEN".to_string()))
            }
            _ => {}
        }
        config.model = model;

        // Quota and retry
        if let Some(val) = env("CODEFORGE_REQUESTS_PER_MINUTE") {
            config.rate_limits.requests_per_minute =
                parse_env_value(&val, "CODEFORGE_REQUESTS_PER_MINUTE")?;
        }
        if let Some(val) = env("CODEFORGE_TOKENS_PER_MINUTE") {
            config.rate_limits.tokens_per_minute =
                parse_env_value(&val, "CODEFORGE_TOKENS_PER_MINUTE")?;
        }
        if let Some(val) = env("CODEFORGE_MAX_RETRIES") {
            config.retry.max_retries = parse_env_value(&val, "CODEFORGE_MAX_RETRIES")?;
        }
        if let Some(val) = env("CODEFORGE_RETRY_INITIAL_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "CODEFORGE_RETRY_INITIAL_DELAY_MS")?;
            config.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(val) = env("CODEFORGE_RETRY_MAX_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "CODEFORGE_RETRY_MAX_DELAY_MS")?;
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(val) = env("CODEFORGE_RETRY_BACKOFF_MULTIPLIER") {
            config.retry.backoff_multiplier =
                parse_env_value(&val, "CODEFORGE_RETRY_BACKOFF_MULTIPLIER")?;
        }

        // Generation defaults
        if let Some(val) = env("CODEFORGE_DEFAULT_LANGUAGE") {
            config.default_language = crate::language::normalize_language(&val);
        }
        if let Some(val) = env("CODEFORGE_MAX_TOKENS") {
            config.max_tokens = parse_env_value(&val, "CODEFORGE_MAX_TOKENS")?;
        }
        if let Some(val) = env("CODEFORGE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "CODEFORGE_TEMPERATURE")?;
        }
        if let Some(val) = env("CODEFORGE_TOP_P") {
            config.top_p = parse_env_value(&val, "CODEFORGE_TOP_P")?;
        }

        // Test execution
        if let Some(val) = env("CODEFORGE_TEST_TIMEOUT_MS") {
            let ms: u64 = parse_env_value(&val, "CODEFORGE_TEST_TIMEOUT_MS")?;
            config.test_timeout = Duration::from_millis(ms);
        }
        if let Some(val) = env("CODEFORGE_TEST_MAX_OUTPUT_BYTES") {
            config.test_max_output_bytes =
                parse_env_value(&val, "CODEFORGE_TEST_MAX_OUTPUT_BYTES")?;
        }

        // Storage
        if let Some(val) = env("ARTIFACT_STORAGE_PATH") {
            config.artifact_path = PathBuf::from(val);
        }
        if let Some(val) = env("CODEFORGE_TEST_SUITE_PATH") {
            config.test_suite_path = PathBuf::from(val);
        }

        // Run retention
        if let Some(val) = env("CODEFORGE_RUN_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "CODEFORGE_RUN_TTL_SECS")?;
            config.run_ttl = Duration::from_secs(secs);
        }
        if let Some(val) = env("CODEFORGE_RUN_STORE_CAPACITY") {
            config.run_store_capacity = parse_env_value(&val, "CODEFORGE_RUN_STORE_CAPACITY")?;
        }
        if let Some(val) = env("CODEFORGE_MAX_CONCURRENT_RUNS") {
            config.max_concurrent_runs = parse_env_value(&val, "CODEFORGE_MAX_CONCURRENT_RUNS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.model_name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model_name cannot be empty".to_string(),
            ));
        }

        if self.model.timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "model timeout must be greater than 0".to_string(),
            ));
        }

        if self.rate_limits.requests_per_minute == 0 {
            return Err(ConfigError::ValidationFailed(
                "requests_per_minute must be greater than 0".to_string(),
            ));
        }

        if self.rate_limits.tokens_per_minute == 0 {
            return Err(ConfigError::ValidationFailed(
                "tokens_per_minute must be greater than 0".to_string(),
            ));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationFailed(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.retry.initial_delay > self.retry.max_delay {
            return Err(ConfigError::ValidationFailed(
                "retry initial delay cannot exceed max delay".to_string(),
            ));
        }

        if self.default_language.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "default_language cannot be empty".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::ValidationFailed(
                "top_p must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.test_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "test_timeout must be greater than 0".to_string(),
            ));
        }

        if self.test_max_output_bytes == 0 {
            return Err(ConfigError::ValidationFailed(
                "test_max_output_bytes must be greater than 0".to_string(),
            ));
        }

        if self.run_store_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "run_store_capacity must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_runs == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_runs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the model configuration.
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    /// Builder method to set rate limits.
    pub fn with_rate_limits(mut self, limits: RateLimitConfig) -> Self {
        self.rate_limits = limits;
        self
    }

    /// Builder method to set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Builder method to set the default language.
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    /// Builder method to set the default max tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Builder method to set the default temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Builder method to set the default top_p.
    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = top_p;
        self
    }

    /// Builder method to set the test timeout.
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Builder method to set the artifact path.
    pub fn with_artifact_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = path.into();
        self
    }

    /// Builder method to set the test suite path.
    pub fn with_test_suite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.test_suite_path = path.into();
        self
    }

    /// Builder method to set run retention.
    pub fn with_run_retention(mut self, ttl: Duration, capacity: usize) -> Self {
        self.run_ttl = ttl;
        self.run_store_capacity = capacity;
        self
    }

    /// Builder method to set batch concurrency.
    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max;
        self
    }

    /// Sampling and language defaults for the stages.
    pub fn generation_defaults(&self) -> GenerationDefaults {
        GenerationDefaults {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            language: self.default_language.clone(),
        }
    }

    /// Limits for the test runner.
    pub fn test_runner_config(&self) -> TestRunnerConfig {
        TestRunnerConfig {
            timeout: self.test_timeout,
            max_output_bytes: self.test_max_output_bytes,
            scratch_dir: None,
        }
    }
}

/// Reads a non-empty environment variable.
fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|val| !val.trim().is_empty())
}

/// Credential variable(s) for a deployment mode, first match wins.
fn credential_for(mode: DeploymentMode) -> Option<String> {
    let keys: &[&str] = match mode {
        DeploymentMode::DirectApi => &["CODEFORGE_API_KEY", "GEMINI_API_KEY"],
        DeploymentMode::HostedInference => &["HF_API_TOKEN", "CODEFORGE_API_KEY"],
        DeploymentMode::ManagedCloud => &["VERTEX_ACCESS_TOKEN", "CODEFORGE_API_KEY"],
        DeploymentMode::Local | DeploymentMode::Stub => &[],
    };
    keys.iter().find_map(|key| env(key))
}

/// Parse an environment variable value into a type.
fn mode_from_env() -> Result<DeploymentMode, ConfigError> {
    if let Some(val) = env("USE_STUB_MODEL") {
        if parse_env_bool(&val, "USE_STUB_MODEL")? {
            return Ok(DeploymentMode::Stub);
        }
    }
    match env("CODEFORGE_DEPLOYMENT_MODE") {
        Some(val) => val
            .parse::<DeploymentMode>()
            .map_err(|message| ConfigError::InvalidValue {
                key: "CODEFORGE_DEPLOYMENT_MODE".to_string(),
                message,
            }),
        None => Ok(DeploymentMode::DirectApi),
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
