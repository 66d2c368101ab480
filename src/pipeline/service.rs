//! Entry point for callers: submits runs and looks results up by run id.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

use super::config::{ConfigError, PipelineConfig};
use super::runner::PipelineRunner;
use super::store::{InMemoryRunStore, RunStore};
use super::types::{PipelineRequest, PipelineResult};
use crate::error::ModelError;
use crate::llm::{ModelAdapter, RetryPolicy};
use crate::storage::FsArtifactStore;
use crate::testing::{DirectorySuiteSource, TestRunner};

/// Errors raised while assembling a service.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The model backend could not be constructed.
    #[error("Model backend error: {0}")]
    Backend(#[from] ModelError),
}

/// Runs pipelines and keeps their results retrievable by run id.
pub struct PipelineService {
    runner: Arc<PipelineRunner>,
    store: Arc<dyn RunStore>,
    concurrency_limiter: Arc<Semaphore>,
}

impl PipelineService {
    /// Wraps an existing runner and run store.
    ///
    /// # Arguments
    ///
    /// * `runner` - Runner shared by all submitted runs
    /// * `store` - Where finished results are kept
    /// * `max_concurrent_runs` - Cap on runs executing at once (at least one)
    pub fn new(
        runner: Arc<PipelineRunner>,
        store: Arc<dyn RunStore>,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            runner,
            store,
            concurrency_limiter: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }

    /// Builds the model adapter, artifact store, suite source and run store
    /// described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the configuration is invalid or the backend
    /// cannot be constructed.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let adapter = ModelAdapter::new(&config.model, config.rate_limits)?;
        let runner = PipelineRunner::new(
            Arc::new(adapter),
            Arc::new(FsArtifactStore::new(&config.artifact_path)),
        )
        .with_retry(RetryPolicy::new(config.retry))
        .with_test_runner(TestRunner::new(config.test_runner_config()))
        .with_suite_source(Arc::new(DirectorySuiteSource::new(&config.test_suite_path)))
        .with_defaults(config.generation_defaults());

        tracing::info!(
            mode = %config.model.mode,
            model = %config.model.model_name,
            artifact_path = %config.artifact_path.display(),
            "Pipeline service initialized"
        );

        Ok(Self::new(
            Arc::new(runner),
            Arc::new(InMemoryRunStore::new(
                config.run_ttl,
                config.run_store_capacity,
            )),
            config.max_concurrent_runs,
        ))
    }

    /// Runs `request`, stores the result and returns it.
    pub async fn submit(&self, request: PipelineRequest) -> PipelineResult {
        // The semaphore is never closed, so acquisition only fails after drop.
        let _permit = self.concurrency_limiter.acquire().await.ok();
        let result = self.runner.run(request).await;
        self.store.insert(result.clone());
        result
    }

    /// Runs `request` and returns only its run id, for callers that look the
    /// result up later.
    pub async fn queue(&self, request: PipelineRequest) -> String {
        self.submit(request).await.run_id
    }

    /// Runs several requests concurrently, bounded by the service's limit.
    ///
    /// Results are returned in request order.
    pub async fn submit_batch(&self, requests: Vec<PipelineRequest>) -> Vec<PipelineResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        let futures: Vec<_> = requests
            .into_iter()
            .map(|request| self.submit(request))
            .collect();

        futures::future::join_all(futures).await
    }

    /// Finished result for `run_id`, unless unknown or expired.
    pub fn result(&self, run_id: &str) -> Option<PipelineResult> {
        self.store.get(run_id)
    }

    pub fn runner(&self) -> &Arc<PipelineRunner> {
        &self.runner
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Whether the model backend answers a trivial prompt.
    pub async fn health(&self) -> bool {
        self.runner.adapter().health().await
    }
}

impl std::fmt::Debug for PipelineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineService")
            .field("runner", &self.runner)
            .field("stored_results", &self.store.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelConfig;
    use tempfile::TempDir;

    fn stub_config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig::stub()
            .with_artifact_path(dir.path().join("artifacts"))
            .with_test_suite_path(dir.path().join("suites"))
    }

    #[tokio::test]
    async fn test_submit_stores_result() {
        let dir = TempDir::new().expect("create temp dir");
        let service = PipelineService::from_config(&stub_config(&dir)).expect("stub config");

        let result = service
            .submit(PipelineRequest::new("add two numbers in python"))
            .await;
        assert!(result.is_success());

        let stored = service.result(&result.run_id).expect("stored");
        assert_eq!(stored, result);
        assert!(service.result("run-unknown").is_none());
    }

    #[tokio::test]
    async fn test_queue_returns_run_id() {
        let dir = TempDir::new().expect("create temp dir");
        let service = PipelineService::from_config(&stub_config(&dir)).expect("stub config");

        let run_id = service.queue(PipelineRequest::new("")).await;
        let stored = service.result(&run_id).expect("failed runs are stored too");
        assert!(!stored.is_success());
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let dir = TempDir::new().expect("create temp dir");
        let service = PipelineService::from_config(&stub_config(&dir).with_max_concurrent_runs(2))
            .expect("stub config");

        let results = service
            .submit_batch(vec![
                PipelineRequest::new("add two numbers in python"),
                PipelineRequest::new(" "),
                PipelineRequest::new("reverse a string").with_language("python"),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert!(results[2].is_success());
        assert_eq!(service.store().len(), 3);
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = PipelineConfig::default().with_model(ModelConfig::default());
        let err = PipelineService::from_config(&config).expect_err("no api key");
        assert!(matches!(err, PipelineError::Backend(ModelError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_health_with_stub() {
        let dir = TempDir::new().expect("create temp dir");
        let service = PipelineService::from_config(&stub_config(&dir)).expect("stub config");
        assert!(service.health().await);
    }
}
