//! Local runtime backend (Ollama `/api/generate`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{http_client, status_error, transport_error, with_deadline};
use crate::error::ModelError;
use crate::llm::backend::{
    FinishReason, GenerateRequest, GenerateResponse, ModelBackend, ModelConfig, TokenUsage,
};

/// Default local runtime endpoint.
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Backend for a model served by a local Ollama runtime.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
        })
    }

    /// Build from a [`ModelConfig`]; no credentials are needed.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let base_url = config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL);
        Self::new(base_url, config.model_name.clone(), config.timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ModelError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = format!("{}/api/generate", self.base_url);

        tracing::info!(
            model = model,
            prompt_length = request.prompt.len(),
            "Generating with local backend"
        );

        let body = ApiRequest {
            model,
            prompt: &request.prompt,
            stream: false,
            options: ApiOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
                top_k: request.top_k,
                stop: request.stop_sequences.clone(),
            },
        };

        let call = async {
            let http_response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_error(e, self.timeout))?;

            if !http_response.status().is_success() {
                return Err(status_error(http_response).await);
            }

            let api_response: ApiResponse = http_response.json().await.map_err(|e| {
                ModelError::InvalidResponse(format!("Failed to parse API response: {}", e))
            })?;
            Ok(api_response.into())
        };

        with_deadline(self.timeout, call).await
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: ApiOptions,
}

#[derive(Debug, Serialize)]
struct ApiOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

impl From<ApiResponse> for GenerateResponse {
    fn from(api: ApiResponse) -> Self {
        GenerateResponse {
            text: api.response,
            finish_reason: FinishReason::from_remote(api.done_reason.as_deref()),
            usage: TokenUsage::new(api.prompt_eval_count, api.eval_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DeploymentMode;

    #[test]
    fn test_request_serialization() {
        let body = ApiRequest {
            model: "gemma3:27b",
            prompt: "hello",
            stream: false,
            options: ApiOptions {
                num_predict: Some(64),
                temperature: None,
                top_p: None,
                top_k: None,
                stop: vec!["```".to_string()],
            },
        };
        let json = serde_json::to_value(&body).expect("serialization should succeed");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 64);
        assert!(json["options"].get("temperature").is_none());
        assert_eq!(json["options"]["stop"][0], "```");
    }

    #[test]
    fn test_response_conversion() {
        let api: ApiResponse = serde_json::from_str(
            r#"{"model":"gemma3:27b","response":"print(1)","done":true,"done_reason":"length","prompt_eval_count":5,"eval_count":9}"#,
        )
        .expect("valid body");
        let response: GenerateResponse = api.into();
        assert_eq!(response.text, "print(1)");
        assert_eq!(response.finish_reason, FinishReason::MaxTokens);
        assert_eq!(response.usage.total(), 14);
    }

    #[test]
    fn test_from_config_uses_default_url() {
        let backend = OllamaBackend::from_config(&ModelConfig::new(DeploymentMode::Local))
            .expect("local backend needs no credentials");
        assert_eq!(backend.base_url(), OLLAMA_BASE_URL);
        assert_eq!(backend.name(), "ollama");
    }
}
