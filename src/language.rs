//! Language identifiers shared across the pipeline.
//!
//! Generated code, test execution and artifact naming all key off a short
//! lowercase language identifier such as `python` or `javascript`.

use std::sync::LazyLock;

use regex::Regex;

/// Language used when neither the request nor the prompt names one.
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// Languages the pipeline knows how to name, detect and execute.
pub const KNOWN_LANGUAGES: &[&str] = &[
    "python",
    "javascript",
    "typescript",
    "java",
    "bash",
    "ruby",
    "go",
    "rust",
    "c",
    "cpp",
    "sql",
];

/// Normalizes a language tag (e.g. a code fence info string) to its identifier.
///
/// Unknown tags are lowercased and returned as-is.
pub fn normalize_language(tag: &str) -> String {
    let lower = tag.trim().to_lowercase();
    let normalized = match lower.as_str() {
        "js" | "node" | "nodejs" => "javascript",
        "ts" => "typescript",
        "py" | "python3" => "python",
        "sh" | "shell" | "zsh" => "bash",
        "rb" => "ruby",
        "golang" => "go",
        "rs" => "rust",
        "c++" | "cxx" => "cpp",
        _ => return lower,
    };
    normalized.to_string()
}

/// File extension for source files of the given language.
pub fn file_extension(language: &str) -> &'static str {
    match language {
        "python" => "py",
        "javascript" => "js",
        "typescript" => "ts",
        "java" => "java",
        "bash" => "sh",
        "ruby" => "rb",
        "go" => "go",
        "rust" => "rs",
        "c" => "c",
        "cpp" => "cpp",
        "sql" => "sql",
        _ => "txt",
    }
}

/// Single-line comment prefix for the given language.
pub fn line_comment(language: &str) -> &'static str {
    match language {
        "python" | "bash" | "ruby" => "#",
        "sql" => "--",
        _ => "//",
    }
}

static LANGUAGE_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(python3?|javascript|typescript|node\.?js|java|bash|shell|ruby|golang|rust|cpp|sql)\b")
        .expect("Invalid regex for language mentions")
});

/// Finds the first known language named in free text.
///
/// Matching is whole-word and case-insensitive, so "javascript" does not
/// count as a mention of "java".
pub fn detect_in_prompt(prompt: &str) -> Option<String> {
    LANGUAGE_MENTION
        .find_iter(prompt)
        .map(|m| normalize_language(&m.as_str().replace('.', "")))
        .find(|lang| KNOWN_LANGUAGES.contains(&lang.as_str()))
}
