//! codeforge: prompt-to-code generation pipeline.
//!
//! This library turns natural-language prompts into stored, checked and
//! optionally tested source code by way of a configurable generative model
//! backend.

// Core modules
pub mod cli;
pub mod error;
pub mod language;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod postprocess;
pub mod prompts;
pub mod storage;
pub mod testing;

// Re-export commonly used types
pub use error::{ErrorCode, ModelError, StageError, StorageError};
pub use pipeline::{
    PipelineConfig, PipelineRequest, PipelineResult, PipelineService, PipelineStatus,
};
