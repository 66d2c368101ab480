//! Model backend implementations, one per deployment mode.
//!
//! HTTP backends share client construction, the per-call deadline and the
//! mapping from transport/status failures onto [`ModelError`].

pub mod gemini;
pub mod huggingface;
pub mod ollama;
pub mod stub;

pub use gemini::{GeminiBackend, VertexBackend};
pub use huggingface::HuggingFaceBackend;
pub use ollama::OllamaBackend;
pub use stub::StubBackend;

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use crate::error::ModelError;

/// Builds the shared HTTP client for a backend.
pub(crate) fn http_client() -> Result<Client, ModelError> {
    Client::builder()
        .user_agent(concat!("codeforge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ModelError::Configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Races a backend call against the per-call deadline.
pub(crate) async fn with_deadline<T, F>(timeout: Duration, call: F) -> Result<T, ModelError>
where
    F: Future<Output = Result<T, ModelError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::DeadlineExceeded { timeout }),
    }
}

/// Maps a reqwest transport failure onto the error taxonomy.
pub(crate) fn transport_error(err: reqwest::Error, timeout: Duration) -> ModelError {
    if err.is_timeout() {
        ModelError::DeadlineExceeded { timeout }
    } else if err.is_connect() || err.is_request() {
        ModelError::ServiceUnavailable(err.to_string())
    } else if err.is_decode() {
        ModelError::InvalidResponse(err.to_string())
    } else {
        ModelError::Internal(err.to_string())
    }
}

/// Google-style and OpenAI-style error envelopes.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorDetail {
    Structured { message: String },
    Plain(String),
}

impl ApiErrorDetail {
    fn into_message(self) -> String {
        match self {
            ApiErrorDetail::Structured { message } => message,
            ApiErrorDetail::Plain(message) => message,
        }
    }
}

/// Converts a non-success HTTP response into a [`ModelError`].
pub(crate) async fn status_error(response: Response) -> ModelError {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());

    // Prefer the structured message when the body carries one
    let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
        .map(|parsed| parsed.error.into_message())
        .unwrap_or(error_text);

    classify_status(status, message)
}

fn classify_status(status: StatusCode, message: String) -> ModelError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ModelError::Throttled(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ModelError::ServiceUnavailable(format!("{}: {}", status, message))
        }
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            ModelError::ServiceUnavailable(message)
        }
        s if s.is_server_error() => ModelError::Internal(message),
        s => ModelError::Api {
            status: s.as_u16(),
            message,
        },
    }
}

/// Masks a credential for logging.
pub(crate) fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "quota".into()),
            ModelError::Throttled(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "down".into()),
            ModelError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
            ModelError::Internal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad prompt".into()),
            ModelError::Api { status: 400, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "no".into()),
            ModelError::Api { status: 401, .. }
        ));
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result: Result<(), ModelError> = with_deadline(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ModelError::DeadlineExceeded { .. })));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_through() {
        let result = with_deadline(Duration::from_secs(1), async { Ok::<_, ModelError>(7) }).await;
        assert_eq!(result.expect("call completes in time"), 7);
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("short"), "*****");
        assert_eq!(mask_secret("AIzaSyD-1234567890"), "AIza...7890");
        assert_eq!(mask_secret("ключ-секрет-1234"), "ключ...1234");
        assert_eq!(mask_secret("пароль"), "******");
    }
}
