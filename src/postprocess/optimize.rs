//! Best-effort cleanup and static analysis of generated code.
//!
//! Only [`cleanup`] changes the code. Complexity and duplicate analysis are
//! advisory and end up in the run's optimization report.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Lines shorter than this (after trimming) are ignored by duplicate detection.
const MIN_DUPLICATE_LINE_LENGTH: usize = 10;

/// Preview length of a duplicated line in the report.
const DUPLICATE_PREVIEW_CHARS: usize = 50;

/// Consecutive blank lines kept by cleanup.
const MAX_BLANK_RUN: usize = 2;

static PYTHON_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(@\w|(async\s+def|def|class)\s+\w)")
        .expect("Invalid regex for Python definitions")
});

static SCRIPT_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(export\s+)?(default\s+)?(async\s+function|function|class)\b")
        .expect("Invalid regex for JavaScript definitions")
});

static FUNCTION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:def|function|fn|func)\s+([A-Za-z_]\w*)\s*\(")
        .expect("Invalid regex for function names")
});

static MEMOIZATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)memo|cache|\bMap\b|HashMap|\bdict\(").expect("Invalid regex for memoization")
});

static CLONING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.slice\(\)|\.concat\(\)|\[\.\.\.|\{\.\.\.|copy\.deepcopy\(|\.clone\(\)")
        .expect("Invalid regex for cloning patterns")
});

/// Normalizes whitespace without touching tokens.
///
/// Strips trailing whitespace and leading blank lines, collapses long runs of
/// blank lines, separates top-level definitions with a blank line
/// (Python, JavaScript, TypeScript, Java) and ends the code with one newline.
/// Returns an empty string for whitespace-only input.
pub fn cleanup(code: &str, language: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0;

    for line in code.lines().map(str::trim_end) {
        if line.is_empty() {
            if out.is_empty() {
                continue;
            }
            blank_run += 1;
            if blank_run <= MAX_BLANK_RUN {
                out.push(line);
            }
            continue;
        }

        if blank_run == 0 && starts_top_level_definition(line, language) {
            if let Some(prev) = out.last() {
                if !is_attached(prev) {
                    out.push("");
                }
            }
        }
        blank_run = 0;
        out.push(line);
    }

    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    if out.is_empty() {
        return String::new();
    }

    let mut cleaned = out.join("\n");
    cleaned.push('\n');
    cleaned
}

fn starts_top_level_definition(line: &str, language: &str) -> bool {
    if line.starts_with(char::is_whitespace) {
        return false;
    }
    match language {
        "python" => PYTHON_DEFINITION.is_match(line),
        "javascript" | "typescript" | "java" => SCRIPT_DEFINITION.is_match(line),
        _ => false,
    }
}

/// Decorators, annotations and comments belong to the definition below them.
fn is_attached(prev: &str) -> bool {
    let prev = prev.trim_start();
    prev.starts_with('@')
        || prev.starts_with('#')
        || prev.starts_with("//")
        || prev.starts_with("*")
        || prev.starts_with("/*")
}

/// Heuristic complexity findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityReport {
    /// Deepest loop nesting found, by indentation.
    pub max_loop_depth: usize,
    /// `O(1)`, `O(n)` or `O(n^k)` from the loop depth.
    pub time_complexity: String,
    pub suggestions: Vec<String>,
}

/// Estimates loop nesting and flags common inefficiencies.
pub fn analyze_complexity(code: &str) -> ComplexityReport {
    let max_loop_depth = max_loop_depth(code);
    let mut suggestions = Vec::new();

    if max_loop_depth >= 2 {
        suggestions.push(format!(
            "Nested loops detected (depth {}): possible O(n^{}) complexity",
            max_loop_depth, max_loop_depth
        ));
    }
    if let Some(name) = recursive_function(code) {
        if !MEMOIZATION.is_match(code) {
            suggestions.push(format!(
                "Recursive function '{}' has no memoization; consider caching results",
                name
            ));
        }
    }
    if CLONING.is_match(code) {
        suggestions.push(
            "Collection copies detected; consider working with references".to_string(),
        );
    }

    let time_complexity = match max_loop_depth {
        0 => "O(1)".to_string(),
        1 => "O(n)".to_string(),
        k => format!("O(n^{})", k),
    };

    ComplexityReport {
        max_loop_depth,
        time_complexity,
        suggestions,
    }
}

fn is_loop_header(trimmed: &str) -> bool {
    ["for ", "for(", "while ", "while(", "do {", "do{", "loop {"]
        .iter()
        .any(|kw| trimmed.starts_with(kw))
        || trimmed.contains(".forEach(")
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn max_loop_depth(code: &str) -> usize {
    let mut open_loops: Vec<usize> = Vec::new();
    let mut max_depth = 0;

    for line in code.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == "}" {
            continue;
        }
        let indent = indent_width(line);
        while open_loops.last().is_some_and(|&loop_indent| loop_indent >= indent) {
            open_loops.pop();
        }
        if is_loop_header(trimmed) {
            open_loops.push(indent);
            max_depth = max_depth.max(open_loops.len());
        }
    }
    max_depth
}

/// First defined function whose name is called again in the code.
fn recursive_function(code: &str) -> Option<String> {
    FUNCTION_NAME.captures_iter(code).find_map(|caps| {
        let name = caps.get(1)?.as_str();
        let pattern = Regex::new(&format!(r"\b{}\s*\(", regex::escape(name))).ok()?;
        (pattern.find_iter(code).count() > 1).then(|| name.to_string())
    })
}

/// Lines repeated verbatim (after trimming).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub duplicate_count: usize,
    pub details: Vec<String>,
}

/// Finds repeated lines longer than ten characters, in first-seen order.
pub fn detect_duplicates(code: &str) -> DuplicateReport {
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for line in code.lines().map(str::trim) {
        if line.chars().count() <= MIN_DUPLICATE_LINE_LENGTH {
            continue;
        }
        let count = occurrences.entry(line).or_insert(0);
        if *count == 0 {
            order.push(line);
        }
        *count += 1;
    }

    let details: Vec<String> = order
        .into_iter()
        .filter(|line| occurrences[line] > 1)
        .map(|line| {
            let preview: String = line.chars().take(DUPLICATE_PREVIEW_CHARS).collect();
            format!("Line appears {} times: {}", occurrences[line], preview)
        })
        .collect();

    DuplicateReport {
        duplicate_count: details.len(),
        details,
    }
}

/// Everything the optimization stage learned about the code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub complexity: ComplexityReport,
    pub duplicates: DuplicateReport,
    /// Whether cleanup changed the code.
    pub changed: bool,
    pub original_length: usize,
    pub optimized_length: usize,
}

/// Runs cleanup and analysis.
///
/// # Errors
///
/// Returns `StageError::Optimization` if cleanup leaves nothing behind.
pub fn optimize(code: &str, language: &str) -> Result<(String, OptimizationReport), StageError> {
    let optimized = cleanup(code, language);
    if optimized.trim().is_empty() {
        return Err(StageError::Optimization(
            "cleanup produced empty code".to_string(),
        ));
    }

    let report = OptimizationReport {
        complexity: analyze_complexity(&optimized),
        duplicates: detect_duplicates(&optimized),
        changed: optimized != code,
        original_length: code.len(),
        optimized_length: optimized.len(),
    };
    Ok((optimized, report))
}
