//! Code extraction from raw model output.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::language::normalize_language;

/// Language reported for a fence without an info string.
pub const PLAINTEXT: &str = "plaintext";

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+#.-]*)[^\n]*\n(.*?)```")
        .expect("Invalid regex for fenced code blocks")
});

static UNTERMINATED_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[ \t]*([A-Za-z0-9_+#.-]*)[^\n]*\n(.*)$")
        .expect("Invalid regex for unterminated fence")
});

static CODE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<CODE>(.*?)</CODE>").expect("Invalid regex for CODE tags")
});

static EXPLANATION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<EXPLANATION>(.*?)</EXPLANATION>").expect("Invalid regex for EXPLANATION tags")
});

/// A fenced code block found in model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Normalized language tag, `plaintext` when the fence had none.
    pub language: String,
    pub code: String,
    /// 1-based line of the block's first code line in the full text.
    pub start_line: usize,
    /// 1-based line of the block's last code line.
    pub end_line: usize,
}

/// Structured view of a model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedOutput {
    pub full_text: String,
    pub code_blocks: Vec<CodeBlock>,
    pub has_code: bool,
    /// Most frequent block language; ties go to the earliest; `unknown` with no blocks.
    pub main_language: String,
}

/// Finds every fenced code block in `text`.
pub fn parse_model_output(text: &str) -> ParsedOutput {
    let mut code_blocks = Vec::new();

    for caps in FENCED_BLOCK.captures_iter(text) {
        let (Some(tag), Some(body)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let language = if tag.as_str().is_empty() {
            PLAINTEXT.to_string()
        } else {
            normalize_language(tag.as_str())
        };

        let raw = body.as_str();
        let leading_newlines = raw.len() - raw.trim_start_matches(['\n', '\r']).len();
        let code = raw.trim().to_string();
        let start_line = line_of(text, body.start())
            + raw[..leading_newlines].matches('\n').count();
        let end_line = start_line + code.lines().count().saturating_sub(1);

        code_blocks.push(CodeBlock {
            language,
            code,
            start_line,
            end_line,
        });
    }

    let main_language = main_language(&code_blocks);
    ParsedOutput {
        full_text: text.to_string(),
        has_code: !code_blocks.is_empty(),
        code_blocks,
        main_language,
    }
}

fn line_of(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].matches('\n').count() + 1
}

fn main_language(blocks: &[CodeBlock]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for block in blocks {
        *counts.entry(block.language.as_str()).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for block in blocks {
        let count = counts[block.language.as_str()];
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((block.language.as_str(), count));
        }
    }
    best.map(|(lang, _)| lang.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Code pulled out of a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCode {
    pub code: String,
    /// Language named by the fence, if any.
    pub language: Option<String>,
}

/// Pulls the candidate program out of free-form model text.
pub trait CodeExtractor: Send + Sync {
    /// Returns `None` when the text yields no non-empty code.
    fn extract(&self, text: &str) -> Option<ExtractedCode>;
}

/// Extractor for the markup models actually produce.
///
/// Precedence: `<CODE>…</CODE>` tags, then the first fenced block, then an
/// unterminated opening fence (output cut off at the token limit), then the
/// whole trimmed text.
#[derive(Debug, Clone, Copy, Default)]
pub struct FencedCodeExtractor;

impl CodeExtractor for FencedCodeExtractor {
    fn extract(&self, text: &str) -> Option<ExtractedCode> {
        // Tagged output may still wrap the code in a fence
        let scope = CODE_TAG
            .captures(text)
            .and_then(|c| c.get(1))
            .map_or(text, |body| body.as_str());

        match find_fence(scope) {
            Some((language, body)) => non_empty(body, language),
            None => non_empty(scope, None),
        }
    }
}

/// Trimmed body of the first closed `<EXPLANATION>` block, if non-empty.
pub fn extract_explanation(text: &str) -> Option<String> {
    EXPLANATION_TAG
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|body| body.as_str().trim())
        .filter(|body| !body.is_empty())
        .map(str::to_string)
}

/// First closed fence, else an unterminated fence opening the text.
fn find_fence(text: &str) -> Option<(Option<String>, &str)> {
    let caps = FENCED_BLOCK
        .captures(text)
        .or_else(|| UNTERMINATED_FENCE.captures(text))?;

    let language = caps
        .get(1)
        .map(|m| m.as_str())
        .filter(|tag| !tag.is_empty())
        .map(normalize_language);
    Some((language, caps.get(2).map_or("", |body| body.as_str())))
}

fn non_empty(code: &str, language: Option<String>) -> Option<ExtractedCode> {
    let code = code.trim();
    if code.is_empty() {
        None
    } else {
        Some(ExtractedCode {
            code: code.to_string(),
            language,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multiple_blocks_with_line_spans() {
        let text = "Here you go:\n```py\ndef f():\n    return 1\n```\nand tests:\n```python\nassert f() == 1\n```\n```js\nconsole.log(1)\n```\n";
        let parsed = parse_model_output(text);

        assert!(parsed.has_code);
        assert_eq!(parsed.code_blocks.len(), 3);
        assert_eq!(parsed.code_blocks[0].language, "python");
        assert_eq!(parsed.code_blocks[0].start_line, 3);
        assert_eq!(parsed.code_blocks[0].end_line, 4);
        assert_eq!(parsed.code_blocks[1].start_line, 8);
        assert_eq!(parsed.code_blocks[1].end_line, 8);
        assert_eq!(parsed.code_blocks[2].language, "javascript");
        assert_eq!(parsed.main_language, "python");
    }

    #[test]
    fn test_parse_without_blocks() {
        let parsed = parse_model_output("just prose");
        assert!(!parsed.has_code);
        assert_eq!(parsed.main_language, "unknown");
    }

    #[test]
    fn test_untagged_fence_is_plaintext() {
        let parsed = parse_model_output("```\nls -la\n```");
        assert_eq!(parsed.code_blocks[0].language, PLAINTEXT);
    }

    #[test]
    fn test_main_language_tie_goes_to_first() {
        let parsed = parse_model_output("```ts\na\n```\n```sh\nb\n```");
        assert_eq!(parsed.main_language, "typescript");
    }

    #[test]
    fn test_extract_prefers_code_tags() {
        let text = "```python\nprint('fence')\n```\n<CODE>print('tag')</CODE>";
        let extracted = FencedCodeExtractor.extract(text).expect("code present");
        assert_eq!(extracted.code, "print('tag')");
        assert_eq!(extracted.language, None);
    }

    #[test]
    fn test_extract_explanation() {
        let text = "<CODE>\necho hi\n</CODE>\n\n<EXPLANATION>\n Prints a greeting.\n</EXPLANATION>";
        assert_eq!(
            extract_explanation(text).as_deref(),
            Some("Prints a greeting.")
        );
        assert!(extract_explanation("<EXPLANATION>  </EXPLANATION>").is_none());
        assert!(extract_explanation("<EXPLANATION>never closed").is_none());
    }

    #[test]
    fn test_extract_first_fenced_block() {
        let text = "Sure!\n```python\ndef add(a, b):\n    return a + b\n```\nMore:\n```js\nx\n```";
        let extracted = FencedCodeExtractor.extract(text).expect("code present");
        assert_eq!(extracted.code, "def add(a, b):\n    return a + b");
        assert_eq!(extracted.language.as_deref(), Some("python"));
    }

    #[test]
    fn test_extract_unterminated_fence() {
        let text = "```bash\necho PASS\necho partial";
        let extracted = FencedCodeExtractor.extract(text).expect("code present");
        assert_eq!(extracted.code, "echo PASS\necho partial");
        assert_eq!(extracted.language.as_deref(), Some("bash"));
    }

    #[test]
    fn test_extract_falls_back_to_trimmed_text() {
        let extracted = FencedCodeExtractor
            .extract("\n  def solve():\n    pass\n\n")
            .expect("code present");
        assert_eq!(extracted.code, "def solve():\n    pass");
    }

    #[test]
    fn test_extract_empty_yields_none() {
        assert!(FencedCodeExtractor.extract("   \n\t").is_none());
        assert!(FencedCodeExtractor.extract("```python\n\n```").is_none());
    }
}
