//! Command-line interface for codeforge.
//!
//! Provides commands for running the generation pipeline, probing the model
//! backend and executing tests directly.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
