//! Prompt-to-artifact pipeline.
//!
//! A run takes a [`PipelineRequest`] through seven stages in fixed order and
//! always ends in a [`PipelineResult`], success or failure.
//!
//! # Stages
//!
//! | Stage | On failure | Skippable |
//! |---|---|---|
//! | preprocessing | abort | no |
//! | modelInvocation | abort | no |
//! | normalization | abort | no |
//! | optimization | record, continue | `skipOptimization` |
//! | validation | record, continue | `skipValidation` |
//! | testing | record, continue | `skipTesting`, or no test suite |
//! | packaging | abort | no |
//!
//! Stages exchange data only through the run's [`PipelineContext`]. The
//! context lives for one run and is projected into the result at the end.
//!
//! # Example
//!
//! ```rust,ignore
//! use codeforge::pipeline::{PipelineConfig, PipelineRequest, PipelineService};
//!
//! let service = PipelineService::from_config(&PipelineConfig::from_env()?)?;
//!
//! let result = service
//!     .submit(PipelineRequest::new("add two numbers in python").with_test_suite("add"))
//!     .await;
//!
//! println!("{} finished with status {}", result.run_id, result.status);
//! let again = service.result(&result.run_id);
//! ```
//!
//! # Batch Execution
//!
//! ```rust,ignore
//! let results = service
//!     .submit_batch(vec![
//!         PipelineRequest::new("fizzbuzz in ruby"),
//!         PipelineRequest::new("binary search").with_language("go"),
//!     ])
//!     .await;
//! ```

pub mod config;
pub mod context;
pub mod runner;
pub mod service;
pub mod stages;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::{ConfigError, PipelineConfig};
pub use context::{generate_run_id, DataKey, PipelineContext};
pub use runner::PipelineRunner;
pub use service::{PipelineError, PipelineService};
pub use stages::{resolve_language, skip_reason, GenerationDefaults};
pub use store::{InMemoryRunStore, RunStore, DEFAULT_RUN_STORE_CAPACITY, DEFAULT_RUN_TTL};
pub use types::{
    PipelineOptions, PipelineRequest, PipelineResult, PipelineStatus, StageName, StageOutcome,
    StageStatus, TestSummary,
};
