//! Exponential-backoff retry around fallible model calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt; the operation runs at most `max_retries + 1` times.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Configuration that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay following `current`: multiplied by the backoff factor, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier.max(0.0))
            .min(self.max_delay)
    }
}

/// Retries an async operation with exponential backoff.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation`, retrying errors the default predicate accepts
    /// ([`ModelError::is_retryable`]).
    pub async fn run<T, Op, Fut>(&self, operation: Op) -> Result<T, ModelError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        self.retry(operation, ModelError::is_retryable).await
    }

    /// Runs `operation` up to `max_retries + 1` times.
    ///
    /// The last attempt's error propagates unchanged; an error rejected by
    /// `is_retryable` propagates immediately. Each call starts again from
    /// `initial_delay`.
    pub async fn retry<T, E, Op, Fut, P>(&self, mut operation: Op, is_retryable: P) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut delay = self.config.initial_delay;
        let mut attempt: u32 = 0;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= self.config.max_retries {
                if self.config.max_retries > 0 {
                    tracing::warn!(attempts = attempt + 1, error = %err, "Retries exhausted");
                }
                return Err(err);
            }
            if !is_retryable(&err) {
                tracing::debug!(attempt = attempt, error = %err, "Error is not retryable");
                return Err(err);
            }

            tracing::warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after backoff"
            );
            tokio::time::sleep(delay).await;

            delay = self.config.next_delay(delay);
            attempt += 1;
        }
    }
}
