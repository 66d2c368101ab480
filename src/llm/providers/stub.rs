//! Offline deterministic backend.
//!
//! Used by tests and by `--stub` runs. Never touches the network.

use async_trait::async_trait;

use crate::error::ModelError;
use crate::llm::backend::{
    estimate_tokens, FinishReason, GenerateRequest, GenerateResponse, ModelBackend, TokenUsage,
};

const ADD_FUNCTION: &str = "def add(a: int, b: int) -> int:\n    \"\"\"Return the sum of a and b.\"\"\"\n    return a + b\n";

const PLACEHOLDER: &str = "def solve():\n    # TODO: implement solution\n    pass\n";

/// Backend that answers from a fixed set of canned programs.
#[derive(Debug, Default, Clone)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }

    fn answer(prompt: &str) -> &'static str {
        let prompt = prompt.to_lowercase();
        if prompt.contains("add two numbers") && prompt.contains("python") {
            ADD_FUNCTION
        } else if prompt.contains("say \"ok\"") {
            "ok"
        } else {
            PLACEHOLDER
        }
    }
}

#[async_trait]
impl ModelBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ModelError> {
        let text = Self::answer(&request.prompt);
        tracing::debug!(prompt_length = request.prompt.len(), "Answering from stub backend");

        Ok(GenerateResponse {
            text: text.to_string(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::new(
                u32::try_from(estimate_tokens(&request.prompt)).unwrap_or(u32::MAX),
                u32::try_from(estimate_tokens(text)).unwrap_or(u32::MAX),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_two_numbers_in_python() {
        let response = StubBackend::new()
            .generate(&GenerateRequest::new("Add two numbers in Python"))
            .await
            .expect("stub never fails");
        assert!(response.text.starts_with("def add(a: int, b: int) -> int:"));
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.input_tokens, 7);
    }

    #[tokio::test]
    async fn test_other_prompts_get_placeholder() {
        let response = StubBackend::new()
            .generate(&GenerateRequest::new("reverse a linked list"))
            .await
            .expect("stub never fails");
        assert_eq!(response.text, PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_stub_is_healthy() {
        assert!(StubBackend::new().health().await);
    }
}
