//! Post-processing of model output: extraction, cleanup and lint checks.

pub mod extract;
pub mod optimize;
pub mod validate;

pub use extract::{
    extract_explanation, parse_model_output, CodeBlock, CodeExtractor, ExtractedCode, FencedCodeExtractor,
    ParsedOutput,
};
pub use optimize::{
    analyze_complexity, cleanup, detect_duplicates, optimize, ComplexityReport, DuplicateReport,
    OptimizationReport,
};
pub use validate::{validate, Severity, ValidationIssue, ValidationReport};
