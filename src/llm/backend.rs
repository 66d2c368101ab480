//! Backend-neutral generation contract.
//!
//! Every deployment mode (direct API, local runtime, managed cloud, hosted
//! inference, offline stub) implements [`ModelBackend`]. Exactly one backend
//! is selected per adapter by [`build_backend`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::providers::{
    GeminiBackend, HuggingFaceBackend, OllamaBackend, StubBackend, VertexBackend,
};
use crate::error::ModelError;

/// Prompt sent by health checks.
pub const HEALTH_CHECK_PROMPT: &str = "Say \"ok\"";

/// Request for text generation from a model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Prompt text.
    pub prompt: String,
    /// Model identifier override; backends fall back to their configured model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter (0.0 - 1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Sequences that stop generation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl GenerateRequest {
    /// Create a new generation request with default sampling parameters.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
        }
    }

    /// Set the model override for this request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the top_p for this request.
    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set the top_k for this request.
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Add a stop sequence.
    pub fn with_stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.push(stop.into());
        self
    }
}

/// Why the model stopped generating, normalized across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Other,
}

impl FinishReason {
    /// Maps a backend-specific finish reason onto the normalized set.
    ///
    /// Missing or unrecognized values map to [`FinishReason::Other`]; policy
    /// blocks (recitation, blocklists, content filters) map to `Safety`.
    pub fn from_remote(reason: Option<&str>) -> Self {
        let Some(reason) = reason else {
            return FinishReason::Other;
        };
        match reason.trim().to_ascii_uppercase().as_str() {
            "STOP" | "EOS_TOKEN" | "END_TURN" | "STOP_SEQUENCE" => FinishReason::Stop,
            "MAX_TOKENS" | "LENGTH" => FinishReason::MaxTokens,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
            | "CONTENT_FILTER" => FinishReason::Safety,
            _ => FinishReason::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "STOP",
            FinishReason::MaxTokens => "MAX_TOKENS",
            FinishReason::Safety => "SAFETY",
            FinishReason::Other => "OTHER",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt.
    pub input_tokens: u32,
    /// Number of tokens generated.
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Response from a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Generated text.
    pub text: String,
    /// Normalized finish reason.
    pub finish_reason: FinishReason,
    /// Token usage statistics.
    pub usage: TokenUsage,
}

/// Rough token estimate used for quota accounting (4 chars per token).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Capability interface implemented by one concrete type per deployment mode.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short backend name for logs and metrics.
    fn name(&self) -> &str;

    /// Generate a response for the given request.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ModelError>;

    /// Issues a trivial prompt and reports whether the backend answered.
    async fn health(&self) -> bool {
        let request = GenerateRequest::new(HEALTH_CHECK_PROMPT).with_max_tokens(10);
        match self.generate(&request).await {
            Ok(response) => response.text.to_lowercase().contains("ok"),
            Err(err) => {
                tracing::warn!(backend = self.name(), error = %err, "Health check failed");
                false
            }
        }
    }
}

/// How the generative model is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Google Generative Language API with an API key.
    DirectApi,
    /// Local runtime such as Ollama.
    Local,
    /// Vertex AI managed endpoint.
    ManagedCloud,
    /// Hugging Face hosted inference.
    HostedInference,
    /// Offline deterministic backend.
    Stub,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::DirectApi => "api",
            DeploymentMode::Local => "local",
            DeploymentMode::ManagedCloud => "vertex",
            DeploymentMode::HostedInference => "hf",
            DeploymentMode::Stub => "stub",
        }
    }

    /// Model used when the configuration does not name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            DeploymentMode::DirectApi | DeploymentMode::ManagedCloud => "gemini-2.0-flash",
            DeploymentMode::Local => "gemma3:27b",
            DeploymentMode::HostedInference => "google/gemma-3-27b-it",
            DeploymentMode::Stub => "stub",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api" | "direct" | "direct_api" | "gemini" => Ok(DeploymentMode::DirectApi),
            "local" | "ollama" => Ok(DeploymentMode::Local),
            "vertex" | "managed" | "managed_cloud" => Ok(DeploymentMode::ManagedCloud),
            "hf" | "huggingface" | "hosted" | "hosted_inference" => {
                Ok(DeploymentMode::HostedInference)
            }
            "stub" | "offline" => Ok(DeploymentMode::Stub),
            other => Err(format!(
                "unknown deployment mode '{}': expected api, local, vertex, hf or stub",
                other
            )),
        }
    }
}

/// Connection settings for the selected backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Which backend to construct.
    pub mode: DeploymentMode,
    /// Default model identifier.
    pub model_name: String,
    /// API key or bearer token.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Per-call deadline.
    pub timeout: Duration,
    /// Cloud project (managed-cloud mode only).
    pub project: Option<String>,
    /// Cloud region (managed-cloud mode only).
    pub location: String,
}

impl ModelConfig {
    /// Creates a configuration for the given mode with its default model.
    pub fn new(mode: DeploymentMode) -> Self {
        Self {
            mode,
            model_name: mode.default_model().to_string(),
            api_key: None,
            base_url: None,
            timeout: Duration::from_secs(30),
            project: None,
            location: "us-central1".to_string(),
        }
    }

    /// Offline configuration that never touches the network.
    pub fn stub() -> Self {
        Self::new(DeploymentMode::Stub)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_name = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_project(mut self, project: impl Into<String>, location: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self.location = location.into();
        self
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new(DeploymentMode::DirectApi)
    }
}

/// Constructs the backend for the configured deployment mode.
///
/// # Errors
///
/// Returns `ModelError::Configuration` when a mode's required credentials or
/// project settings are missing, or the HTTP client cannot be built.
pub fn build_backend(config: &ModelConfig) -> Result<Box<dyn ModelBackend>, ModelError> {
    let backend: Box<dyn ModelBackend> = match config.mode {
        DeploymentMode::DirectApi => Box::new(GeminiBackend::from_config(config)?),
        DeploymentMode::Local => Box::new(OllamaBackend::from_config(config)?),
        DeploymentMode::ManagedCloud => Box::new(VertexBackend::from_config(config)?),
        DeploymentMode::HostedInference => Box::new(HuggingFaceBackend::from_config(config)?),
        DeploymentMode::Stub => Box::new(StubBackend::new()),
    };
    tracing::info!(
        backend = backend.name(),
        model = %config.model_name,
        "Model backend initialized"
    );
    Ok(backend)
}
