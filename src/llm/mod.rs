//! Generative model integration.
//!
//! One [`ModelBackend`] per deployment mode (direct API, local runtime,
//! managed cloud, hosted inference, offline stub), fronted by a
//! [`ModelAdapter`] that enforces the shared [`RateLimiter`] quota. Retries
//! belong to the caller and go through [`RetryPolicy`].
//!
//! ```ignore
//! use codeforge::llm::{GenerateRequest, ModelAdapter, ModelConfig, RateLimitConfig};
//!
//! let adapter = ModelAdapter::new(&ModelConfig::stub(), RateLimitConfig::default())?;
//! let response = adapter.generate(&GenerateRequest::new("add two numbers in python")).await?;
//! println!("{}", response.text);
//! ```

pub mod adapter;
pub mod backend;
pub mod providers;
pub mod rate_limiter;
pub mod retry;

pub use adapter::ModelAdapter;
pub use backend::{
    build_backend, estimate_tokens, DeploymentMode, FinishReason, GenerateRequest,
    GenerateResponse, ModelBackend, ModelConfig, TokenUsage, HEALTH_CHECK_PROMPT,
};
pub use providers::{GeminiBackend, HuggingFaceBackend, OllamaBackend, StubBackend, VertexBackend};
pub use rate_limiter::{RateLimitConfig, RateLimitSnapshot, RateLimiter};
pub use retry::{RetryConfig, RetryPolicy};
