//! Google `generateContent` backends.
//!
//! The direct API (API key) and Vertex AI (bearer token, project-scoped URL)
//! speak the same request/response format and differ only in endpoint and
//! authentication.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{http_client, mask_secret, status_error, transport_error, with_deadline};
use crate::error::ModelError;
use crate::llm::backend::{
    FinishReason, GenerateRequest, GenerateResponse, ModelBackend, ModelConfig, TokenUsage,
};

/// Default Generative Language API endpoint.
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Sampling defaults applied when the request leaves them unset.
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TOP_P: f64 = 0.95;
const DEFAULT_TOP_K: u32 = 40;

/// Direct-API backend authenticated with an API key.
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl GeminiBackend {
    /// Create a backend for the given key and model against the public endpoint.
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, ModelError> {
        Ok(Self {
            client: http_client()?,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            model,
            timeout,
        })
    }

    /// Build from a [`ModelConfig`]; an API key is required.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ModelError::Configuration(
                "an API key is required for direct-API mode (set CODEFORGE_API_KEY or GEMINI_API_KEY)"
                    .to_string(),
            )
        })?;
        let mut backend = Self::new(api_key, config.model_name.clone(), config.timeout)?;
        if let Some(url) = &config.base_url {
            backend.base_url = url.trim_end_matches('/').to_string();
        }
        tracing::debug!(
            api_key = %mask_secret(&backend.api_key),
            base_url = %backend.base_url,
            "Configured direct-API backend"
        );
        Ok(backend)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the default model.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ModelError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = self.endpoint(model);

        tracing::info!(
            model = model,
            prompt_length = request.prompt.len(),
            max_tokens = ?request.max_tokens,
            "Generating with direct-API backend"
        );

        let http_request = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&ApiRequest::from_request(request));

        with_deadline(self.timeout, send(http_request, self.timeout)).await
    }
}

/// Vertex AI backend authenticated with an OAuth bearer token.
pub struct VertexBackend {
    client: Client,
    access_token: String,
    project: String,
    location: String,
    base_url: Option<String>,
    model: String,
    timeout: Duration,
}

impl VertexBackend {
    /// Build from a [`ModelConfig`]; a project and an access token are required.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let project = config.project.clone().ok_or_else(|| {
            ModelError::Configuration(
                "a project is required for managed-cloud mode (set VERTEX_PROJECT)".to_string(),
            )
        })?;
        let access_token = config.api_key.clone().ok_or_else(|| {
            ModelError::Configuration(
                "an access token is required for managed-cloud mode (set VERTEX_ACCESS_TOKEN)"
                    .to_string(),
            )
        })?;

        Ok(Self {
            client: http_client()?,
            access_token,
            project,
            location: config.location.clone(),
            base_url: config
                .base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            model: config.model_name.clone(),
            timeout: config.timeout,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        let base = self.base_url.clone().unwrap_or_else(|| {
            format!("https://{}-aiplatform.googleapis.com/v1", self.location)
        });
        format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            base, self.project, self.location, model
        )
    }
}

#[async_trait]
impl ModelBackend for VertexBackend {
    fn name(&self) -> &str {
        "vertex"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ModelError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = self.endpoint(model);

        tracing::info!(
            model = model,
            project = %self.project,
            location = %self.location,
            "Generating with managed-cloud backend"
        );

        let http_request = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&ApiRequest::from_request(request));

        with_deadline(self.timeout, send(http_request, self.timeout)).await
    }
}

async fn send(
    http_request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<GenerateResponse, ModelError> {
    let http_response = http_request
        .send()
        .await
        .map_err(|e| transport_error(e, timeout))?;

    if !http_response.status().is_success() {
        return Err(status_error(http_response).await);
    }

    let api_response: ApiResponse = http_response
        .json()
        .await
        .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse API response: {}", e)))?;

    api_response.into_generate_response()
}

/// Internal request structure for `generateContent`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    generation_config: ApiGenerationConfig,
}

impl ApiRequest {
    fn from_request(request: &GenerateRequest) -> Self {
        Self {
            contents: vec![ApiContent {
                role: Some("user".to_string()),
                parts: vec![ApiPart {
                    text: Some(request.prompt.clone()),
                }],
            }],
            generation_config: ApiGenerationConfig {
                max_output_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
                temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                top_p: request.top_p.unwrap_or(DEFAULT_TOP_P),
                top_k: request.top_k.unwrap_or(DEFAULT_TOP_K),
                stop_sequences: request.stop_sequences.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    max_output_tokens: u32,
    temperature: f64,
    top_p: f64,
    top_k: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

/// Internal response structure from `generateContent`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl ApiResponse {
    fn into_generate_response(self) -> Result<GenerateResponse, ModelError> {
        let usage = self
            .usage_metadata
            .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();

        let Some(candidate) = self.candidates.into_iter().next() else {
            // A prompt blocked before generation comes back without candidates
            if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
                tracing::warn!(block_reason = %reason, "Prompt blocked by backend policy");
                return Ok(GenerateResponse {
                    text: String::new(),
                    finish_reason: FinishReason::Safety,
                    usage,
                });
            }
            return Err(ModelError::InvalidResponse(
                "response contained no candidates".to_string(),
            ));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        Ok(GenerateResponse {
            text,
            finish_reason: FinishReason::from_remote(candidate.finish_reason.as_deref()),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_request_serialization_applies_defaults() {
        let request = GenerateRequest::new("add two numbers").with_max_tokens(256);
        let json = serde_json::to_value(ApiRequest::from_request(&request))
            .expect("serialization should succeed");

        assert_eq!(json["contents"][0]["parts"][0]["text"], "add two numbers");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(json["generationConfig"]["temperature"], 0.7);
        assert_eq!(json["generationConfig"]["topK"], 40);
        assert!(json["generationConfig"].get("stopSequences").is_none());
    }

    #[test]
    fn test_api_response_conversion() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "def add(a, b):"}, {"text": "\n    return a + b"}]},
                "finishReason": "MAX_TOKENS"
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 12}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(body).expect("valid body");
        let response = parsed.into_generate_response().expect("has candidate");

        assert_eq!(response.text, "def add(a, b):\n    return a + b");
        assert_eq!(response.finish_reason, FinishReason::MaxTokens);
        assert_eq!(response.usage, TokenUsage::new(7, 12));
    }

    #[test]
    fn test_api_response_blocked_prompt_maps_to_safety() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: ApiResponse = serde_json::from_str(body).expect("valid body");
        let response = parsed.into_generate_response().expect("blocked prompt is not an error");
        assert_eq!(response.finish_reason, FinishReason::Safety);
        assert!(response.text.is_empty());
    }

    #[test]
    fn test_api_response_without_candidates_is_invalid() {
        let parsed: ApiResponse = serde_json::from_str("{}").expect("valid body");
        assert!(matches!(
            parsed.into_generate_response(),
            Err(ModelError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_missing_finish_reason_maps_to_other() {
        let body = r#"{"candidates": [{"content": {"parts": [{"text": "x"}]}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(body).expect("valid body");
        let response = parsed.into_generate_response().expect("has candidate");
        assert_eq!(response.finish_reason, FinishReason::Other);
        assert_eq!(response.usage, TokenUsage::default());
    }

    #[test]
    fn test_gemini_from_config() {
        let config = ModelConfig::default()
            .with_api_key("test-key-123456789")
            .with_base_url("http://localhost:9999/v1beta/");
        let backend = GeminiBackend::from_config(&config).expect("key is present");
        assert_eq!(backend.base_url(), "http://localhost:9999/v1beta");
        assert_eq!(backend.model(), "gemini-2.0-flash");
        assert_eq!(
            backend.endpoint("gemma-3-27b-it"),
            "http://localhost:9999/v1beta/models/gemma-3-27b-it:generateContent"
        );
    }

    #[test]
    fn test_vertex_endpoint() {
        let config = ModelConfig::new(crate::llm::DeploymentMode::ManagedCloud)
            .with_api_key("token")
            .with_project("my-project", "europe-west4");
        let backend = VertexBackend::from_config(&config).expect("project and token present");
        assert_eq!(
            backend.endpoint("gemini-2.0-flash"),
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/my-project/locations/europe-west4/publishers/google/models/gemini-2.0-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let config = ModelConfig::default()
            .with_api_key("test-key")
            .with_base_url("http://127.0.0.1:9")
            .with_timeout(Duration::from_secs(5));
        let backend = GeminiBackend::from_config(&config).expect("key is present");

        let err = backend
            .generate(&GenerateRequest::new("test"))
            .await
            .expect_err("no server is listening");
        assert!(err.is_retryable(), "unexpected error: {:?}", err);
    }
}
