//! Hosted inference backend (Hugging Face router).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{http_client, mask_secret, status_error, transport_error, with_deadline};
use crate::error::ModelError;
use crate::llm::backend::{
    FinishReason, GenerateRequest, GenerateResponse, ModelBackend, ModelConfig, TokenUsage,
};

/// Default hosted inference endpoint; the model id is appended as a path.
pub const HF_BASE_URL: &str = "https://router.huggingface.co/hf-inference/models";

const DEFAULT_MAX_NEW_TOKENS: u32 = 512;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TOP_P: f64 = 0.95;

/// Backend for hosted text-generation inference.
pub struct HuggingFaceBackend {
    client: Client,
    api_token: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl HuggingFaceBackend {
    /// Build from a [`ModelConfig`]; an access token is required.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let api_token = config.api_key.clone().ok_or_else(|| {
            ModelError::Configuration(
                "an access token is required for hosted-inference mode (set HF_API_TOKEN)"
                    .to_string(),
            )
        })?;
        tracing::debug!(token = %mask_secret(&api_token), "Configured hosted-inference backend");

        Ok(Self {
            client: http_client()?,
            api_token,
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(HF_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: config.model_name.clone(),
            timeout: config.timeout,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/{}", self.base_url, model)
    }
}

#[async_trait]
impl ModelBackend for HuggingFaceBackend {
    fn name(&self) -> &str {
        "huggingface"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ModelError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = self.endpoint(model);

        tracing::info!(
            model = model,
            prompt_length = request.prompt.len(),
            "Generating with hosted-inference backend"
        );

        let body = ApiRequest {
            inputs: &request.prompt,
            parameters: ApiParameters {
                max_new_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_NEW_TOKENS),
                temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                top_p: request.top_p.unwrap_or(DEFAULT_TOP_P),
            },
        };

        let call = async {
            let http_response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_token)
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_error(e, self.timeout))?;

            if !http_response.status().is_success() {
                return Err(status_error(http_response).await);
            }

            let value: serde_json::Value = http_response.json().await.map_err(|e| {
                ModelError::InvalidResponse(format!("Failed to parse API response: {}", e))
            })?;
            Ok(parse_generated(value))
        };

        with_deadline(self.timeout, call).await
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    inputs: &'a str,
    parameters: ApiParameters,
}

#[derive(Debug, Serialize)]
struct ApiParameters {
    max_new_tokens: u32,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

/// The endpoint answers with `[{"generated_text": ...}]`; any other shape is
/// passed through as its JSON text. Usage counts are not reported.
fn parse_generated(value: serde_json::Value) -> GenerateResponse {
    let text = match serde_json::from_value::<Vec<GeneratedText>>(value.clone()) {
        Ok(items) if !items.is_empty() => items
            .into_iter()
            .next()
            .map(|item| item.generated_text)
            .unwrap_or_default(),
        _ => value.to_string(),
    };

    GenerateResponse {
        text,
        finish_reason: FinishReason::Stop,
        usage: TokenUsage::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DeploymentMode;

    #[test]
    fn test_parse_generated_text_array() {
        let response = parse_generated(serde_json::json!([{"generated_text": "def f(): pass"}]));
        assert_eq!(response.text, "def f(): pass");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.total(), 0);
    }

    #[test]
    fn test_parse_unexpected_shape_passes_json_through() {
        let response = parse_generated(serde_json::json!({"warning": "loading"}));
        assert_eq!(response.text, r#"{"warning":"loading"}"#);
    }

    #[test]
    fn test_endpoint_appends_model() {
        let config = ModelConfig::new(DeploymentMode::HostedInference).with_api_key("hf_token");
        let backend = HuggingFaceBackend::from_config(&config).expect("token present");
        assert_eq!(
            backend.endpoint("google/gemma-3-27b-it"),
            "https://router.huggingface.co/hf-inference/models/google/gemma-3-27b-it"
        );
    }

    #[test]
    fn test_request_defaults() {
        let body = ApiRequest {
            inputs: "x",
            parameters: ApiParameters {
                max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
                temperature: DEFAULT_TEMPERATURE,
                top_p: DEFAULT_TOP_P,
            },
        };
        let json = serde_json::to_value(&body).expect("serialization should succeed");
        assert_eq!(json["parameters"]["max_new_tokens"], 512);
    }
}
