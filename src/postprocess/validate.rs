//! Structural and lint checks over generated code.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::language::line_comment;

/// Lines longer than this are reported.
pub const MAX_LINE_LENGTH: usize = 120;

static TODO_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(TODO|FIXME)\b").expect("Invalid regex for TODO markers"));

static BARE_EXCEPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*except\s*:").expect("Invalid regex for bare except"));

static VAR_DECLARATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[;{(\s])var\s+\w").expect("Invalid regex for var"));

static EVAL_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\beval\s*\(").expect("Invalid regex for eval"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Short rule identifier, e.g. `unbalanced-delimiter`.
    pub rule: String,
    pub message: String,
    /// 1-based line, when the issue has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl ValidationIssue {
    fn new(severity: Severity, rule: &str, message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            severity,
            rule: rule.to_string(),
            message: message.into(),
            line,
        }
    }
}

/// All findings for one piece of code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// True when no error-severity issue was found.
    pub fn passed(&self) -> bool {
        self.error_count() == 0
    }
}

/// Runs every check that applies to `language`.
pub fn validate(code: &str, language: &str) -> ValidationReport {
    let mut issues = Vec::new();

    check_delimiters(code, language, &mut issues);
    check_indentation(code, &mut issues);

    for (idx, line) in code.lines().enumerate() {
        let line_no = Some(idx + 1);

        if line.trim_start().starts_with("```") {
            issues.push(ValidationIssue::new(
                Severity::Error,
                "markdown-fence",
                "leftover markdown code fence",
                line_no,
            ));
        }
        let length = line.chars().count();
        if length > MAX_LINE_LENGTH {
            issues.push(ValidationIssue::new(
                Severity::Info,
                "line-length",
                format!("line is {} characters (max {})", length, MAX_LINE_LENGTH),
                line_no,
            ));
        }
        if let Some(m) = TODO_MARKER.find(line) {
            issues.push(ValidationIssue::new(
                Severity::Warning,
                "todo-marker",
                format!("unfinished work marker {}", m.as_str()),
                line_no,
            ));
        }
        if EVAL_CALL.is_match(line) {
            issues.push(ValidationIssue::new(
                Severity::Warning,
                "eval",
                "use of eval()",
                line_no,
            ));
        }

        match language {
            "python" if BARE_EXCEPT.is_match(line) => issues.push(ValidationIssue::new(
                Severity::Warning,
                "bare-except",
                "bare except clause catches every exception",
                line_no,
            )),
            "javascript" | "typescript" if VAR_DECLARATION.is_match(line) => {
                issues.push(ValidationIssue::new(
                    Severity::Warning,
                    "var-declaration",
                    "prefer let or const over var",
                    line_no,
                ))
            }
            _ => {}
        }
    }

    ValidationReport { issues }
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Bracket matching that skips string literals and line comments.
///
/// Shell is not checked: `case` arm patterns close a `)` that was never
/// opened, and `#` is both a comment and a parameter-expansion operator.
fn check_delimiters(code: &str, language: &str, issues: &mut Vec<ValidationIssue>) {
    if language == "bash" {
        return;
    }
    let comment = line_comment(language);
    // Rust lifetimes and char literals make single quotes ambiguous
    let quotes: &[char] = if language == "rust" {
        &['"']
    } else {
        &['"', '\'', '`']
    };

    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut in_string: Option<char> = None;

    for (idx, line) in code.lines().enumerate() {
        let line_no = idx + 1;
        let mut chars = line.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            if let Some(quote) = in_string {
                if c == '\\' {
                    chars.next();
                } else if c == quote {
                    in_string = None;
                }
                continue;
            }

            if line[pos..].starts_with(comment) {
                break;
            }
            match c {
                q if quotes.contains(&q) => in_string = Some(q),
                '(' | '[' | '{' => stack.push((c, line_no)),
                ')' | ']' | '}' => match stack.pop() {
                    Some((open, _)) if closing_for(open) == c => {}
                    Some((open, open_line)) => {
                        issues.push(ValidationIssue::new(
                            Severity::Error,
                            "unbalanced-delimiter",
                            format!(
                                "'{}' closes '{}' opened on line {}",
                                c, open, open_line
                            ),
                            Some(line_no),
                        ));
                        return;
                    }
                    None => {
                        issues.push(ValidationIssue::new(
                            Severity::Error,
                            "unbalanced-delimiter",
                            format!("unmatched '{}'", c),
                            Some(line_no),
                        ));
                        return;
                    }
                },
                _ => {}
            }
        }

        // Only template literals and Python triple quotes span lines
        if matches!(in_string, Some('"') | Some('\'')) && !line.contains("\"\"\"") {
            in_string = None;
        }
    }

    if let Some((open, line)) = stack.pop() {
        issues.push(ValidationIssue::new(
            Severity::Error,
            "unbalanced-delimiter",
            format!("'{}' is never closed", open),
            Some(line),
        ));
    }
}

fn check_indentation(code: &str, issues: &mut Vec<ValidationIssue>) {
    let mut tab_line = None;
    let mut space_line = None;

    for (idx, line) in code.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let leading: String = line.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
        if leading.contains('\t') && leading.contains(' ') {
            issues.push(ValidationIssue::new(
                Severity::Warning,
                "mixed-indentation",
                "line indents with both tabs and spaces",
                Some(idx + 1),
            ));
            return;
        }
        if leading.starts_with('\t') {
            tab_line.get_or_insert(idx + 1);
        } else if leading.starts_with(' ') {
            space_line.get_or_insert(idx + 1);
        }
    }

    if let (Some(tab), Some(space)) = (tab_line, space_line) {
        issues.push(ValidationIssue::new(
            Severity::Warning,
            "mixed-indentation",
            format!(
                "tabs (line {}) and spaces (line {}) both used for indentation",
                tab, space
            ),
            Some(tab.max(space)),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(report: &ValidationReport) -> Vec<&str> {
        report.issues.iter().map(|i| i.rule.as_str()).collect()
    }

    #[test]
    fn test_clean_python_passes() {
        let code = "def add(a: int, b: int) -> int:\n    \"\"\"Return the sum of a and b.\"\"\"\n    return a + b\n";
        let report = validate(code, "python");
        assert!(report.issues.is_empty(), "unexpected issues: {:?}", report.issues);
        assert!(report.passed());
    }

    #[test]
    fn test_unbalanced_delimiters() {
        let report = validate("function f() {\n  return [1, 2;\n}\n", "javascript");
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.issues[0].line, Some(3));

        let report = validate("print((1)\n", "python");
        assert!(!report.passed());
        assert!(report.issues[0].message.contains("never closed"));
    }

    #[test]
    fn test_delimiters_in_strings_and_comments_are_ignored() {
        let code = "s = \"(\"  # )\nt = 'it''s ]'\n";
        assert!(validate(code, "python").passed());

        let js = "const s = `${a} (`;\n// }\n";
        assert!(validate(js, "javascript").passed());
    }

    #[test]
    fn test_shell_case_arms_and_length_expansion_pass() {
        let code = "count() {\n  local arr=(\"$@\")\n  echo \"${#arr[@]}\"\n}\n\
                    case \"$1\" in\n  start) count a b ;;\n  stop|halt) exit 0 ;;\n  *) echo usage ;;\nesac\n";
        let report = validate(code, "bash");
        assert_eq!(report.error_count(), 0, "unexpected issues: {:?}", report.issues);
        assert!(report.passed());

        // a leftover fence is still caught
        assert!(!validate("```bash\necho hi\n", "bash").passed());
    }

    #[test]
    fn test_leftover_fence_is_error() {
        let report = validate("```python\nx = 1\n", "python");
        assert!(!report.passed());
        assert!(rules(&report).contains(&"markdown-fence"));
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let code = "def solve():\n    # TODO: implement solution\n    try:\n        eval(\"1\")\n    except:\n        pass\n";
        let report = validate(code, "python");
        assert!(report.passed());
        let rules = rules(&report);
        assert!(rules.contains(&"todo-marker"));
        assert!(rules.contains(&"eval"));
        assert!(rules.contains(&"bare-except"));
        assert_eq!(report.warning_count(), 3);
    }

    #[test]
    fn test_var_only_flagged_for_scripts() {
        assert!(rules(&validate("var x = 1;\n", "javascript")).contains(&"var-declaration"));
        assert!(validate("var x = 1\n", "go").issues.is_empty());
    }

    #[test]
    fn test_mixed_indentation() {
        let report = validate("if x:\n\ty = 1\nif z:\n    w = 2\n", "python");
        assert_eq!(rules(&report), vec!["mixed-indentation"]);
        assert_eq!(report.issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_long_line_is_info() {
        let code = format!("x = '{}'\n", "a".repeat(130));
        let report = validate(&code, "python");
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].severity, Severity::Info);
        assert!(report.passed());
    }
}
