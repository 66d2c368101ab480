//! Code generation prompt builder.

use serde::{Deserialize, Serialize};

pub const CODE_OPEN: &str = "<CODE>";
pub const CODE_CLOSE: &str = "</CODE>";
pub const EXPLANATION_OPEN: &str = "<EXPLANATION>";
pub const EXPLANATION_CLOSE: &str = "</EXPLANATION>";

/// Coarse task category plus the constraints it implies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIntent {
    /// `general` unless a known task shape was recognized.
    pub intent: String,
    pub constraints: Vec<String>,
}

/// Recognizes a handful of common task shapes and the implementation
/// constraints worth stating for them.
///
/// Matching is case-insensitive substring search. Later matches overwrite the
/// intent but constraints accumulate.
pub fn infer_intent(task: &str) -> TaskIntent {
    let task = task.to_lowercase();
    let mut intent = "general";
    let mut constraints = Vec::new();

    if task.contains("sum of n") || task.contains("sum n") {
        if task.contains("array") || task.contains("list") {
            intent = "sum_array";
        } else {
            intent = "sum_first_n";
            constraints.push("Prefer mathematical formula over loops".to_string());
        }
    }

    if task.contains("duplicate") {
        intent = "find_duplicates";
        constraints.push("Optimize for O(n) time".to_string());
    }

    if task.contains("substring") {
        intent = "string_problem";
        constraints.push("Use sliding window technique".to_string());
    }

    TaskIntent {
        intent: intent.to_string(),
        constraints,
    }
}

/// Builds the model prompt for `task` in `language`.
///
/// # Arguments
///
/// * `task` - The user's (trimmed) request
/// * `language` - Resolved target language identifier
/// * `constraints` - Extra requirements, one per line; omitted when empty
///
/// # Examples
///
/// ```
/// use codeforge::prompts::build_generation_prompt;
///
/// let prompt = build_generation_prompt("write a greet function", "bash", &[]);
/// assert!(prompt.contains("TASK:\nwrite a greet function"));
/// assert!(prompt.contains("<CODE>\nbash code only\n</CODE>"));
/// assert!(!prompt.contains("CONSTRAINTS"));
/// ```
pub fn build_generation_prompt(task: &str, language: &str, constraints: &[String]) -> String {
    let constraint_section = if constraints.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = constraints.iter().map(|c| format!("- {}", c)).collect();
        format!("CONSTRAINTS:\n{}\n\n", lines.join("\n"))
    };

    format!(
        r#"You are a senior software engineer.

TASK:
{task}

LANGUAGE:
{language}

{constraint_section}STRICT OUTPUT RULES:
- Output MUST follow this format exactly
- Write the code in {language} only
- NO headings
- NO markdown explanations before code
- NO extra commentary

FORMAT:
{code_open}
{language_lower} code only
{code_close}

{explanation_open}
Maximum 4 lines explaining the approach
{explanation_close}

Generate optimized, production-quality code.
"#,
        task = task,
        language = language,
        constraint_section = constraint_section,
        code_open = CODE_OPEN,
        code_close = CODE_CLOSE,
        explanation_open = EXPLANATION_OPEN,
        explanation_close = EXPLANATION_CLOSE,
        language_lower = language.to_lowercase(),
    )
}
