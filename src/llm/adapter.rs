//! Rate-limited front door to the selected model backend.

use std::sync::Arc;

use crate::error::ModelError;
use crate::llm::backend::{
    build_backend, estimate_tokens, DeploymentMode, GenerateRequest, GenerateResponse,
    ModelBackend, ModelConfig,
};
use crate::llm::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::metrics::MetricsCollector;

/// Unifies the deployment modes behind one `generate` call.
///
/// Every call is admitted by the adapter's [`RateLimiter`] before reaching the
/// backend. A denied call fails immediately with
/// [`ModelError::RateLimitExceeded`]; the adapter never retries.
///
/// The adapter is shared between concurrent runs (wrap it in an `Arc`).
pub struct ModelAdapter {
    backend: Box<dyn ModelBackend>,
    rate_limiter: Arc<RateLimiter>,
    mode: DeploymentMode,
    metrics: MetricsCollector,
}

impl ModelAdapter {
    /// Builds the backend for `config.mode` with a fresh rate limiter.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Configuration` when the backend cannot be built.
    pub fn new(config: &ModelConfig, limits: RateLimitConfig) -> Result<Self, ModelError> {
        let backend = build_backend(config)?;
        Ok(Self::with_backend(
            backend,
            config.mode,
            Arc::new(RateLimiter::new(limits)),
        ))
    }

    /// Wraps an already constructed backend.
    pub fn with_backend(
        backend: Box<dyn ModelBackend>,
        mode: DeploymentMode,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            backend,
            rate_limiter,
            mode,
            metrics: MetricsCollector::new(),
        }
    }

    /// Offline adapter with default quotas.
    pub fn stub() -> Self {
        Self::with_backend(
            Box::new(crate::llm::providers::StubBackend::new()),
            DeploymentMode::Stub,
            Arc::new(RateLimiter::default()),
        )
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Admits the request against the quota, then delegates to the backend.
    ///
    /// # Errors
    ///
    /// `RateLimitExceeded` (with the suggested wait) on denial, otherwise
    /// whatever the backend reports.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ModelError> {
        let token_cost = estimate_tokens(&request.prompt);
        if !self.rate_limiter.can_proceed(token_cost) {
            let wait = self.rate_limiter.wait_time_for(token_cost);
            self.metrics.record_rate_limit_denial();
            tracing::warn!(
                backend = self.backend.name(),
                token_cost = token_cost,
                wait_ms = wait.as_millis() as u64,
                "Rate limit exceeded"
            );
            return Err(ModelError::RateLimitExceeded { wait });
        }

        let result = self.backend.generate(request).await;
        match &result {
            Ok(response) => {
                self.metrics.record_model_request(
                    self.backend.name(),
                    true,
                    response.usage.input_tokens,
                    response.usage.output_tokens,
                );
                tracing::debug!(
                    backend = self.backend.name(),
                    finish_reason = %response.finish_reason,
                    output_length = response.text.len(),
                    "Model call completed"
                );
            }
            Err(err) => {
                self.metrics
                    .record_model_request(self.backend.name(), false, 0, 0);
                tracing::error!(
                    backend = self.backend.name(),
                    code = %err.code(),
                    error = %err,
                    "Model call failed"
                );
            }
        }
        result
    }

    /// Reports whether the backend answers a trivial prompt. Never fails.
    pub async fn health(&self) -> bool {
        let token_cost = estimate_tokens(crate::llm::backend::HEALTH_CHECK_PROMPT);
        if !self.rate_limiter.can_proceed(token_cost) {
            tracing::warn!(backend = self.backend.name(), "Health check denied by rate limiter");
            return false;
        }
        self.backend.health().await
    }
}

impl std::fmt::Debug for ModelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAdapter")
            .field("backend", &self.backend.name())
            .field("mode", &self.mode)
            .finish()
    }
}
