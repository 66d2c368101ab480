//! Execution of generated code against test suites.
//!
//! The runner spawns the language's interpreter on a temporary file and
//! hands stdout to an [`OutputClassifier`]. The default classifier only looks
//! for literal `PASS`/`FAIL` markers and can be swapped for a structured one
//! without touching the pipeline.

pub mod classify;
pub mod runner;
pub mod suites;

pub use classify::{MarkerClassifier, OutputClassifier, TestCounts};
pub use runner::{
    combine_code_with_tests, runtime_command, ExecutionError, TestResult, TestRunner,
    TestRunnerConfig, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TEST_TIMEOUT,
};
pub use suites::{validate_suite_id, DirectorySuiteSource, StaticSuiteSource, TestSuiteSource};
