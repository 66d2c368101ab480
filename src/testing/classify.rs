//! Pass/fail classification of test output.

use serde::{Deserialize, Serialize};

/// Pass/fail tallies extracted from a clean run's stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
}

/// Turns the stdout of a clean (zero-exit) run into pass/fail counts.
pub trait OutputClassifier: Send + Sync {
    fn classify(&self, output: &str) -> TestCounts;
}

/// Counts lines containing the literal markers `PASS` and `FAIL`.
///
/// A line with both markers counts once for each. Output with no markers at
/// all counts as a single pass, since the process exited cleanly.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerClassifier;

impl OutputClassifier for MarkerClassifier {
    fn classify(&self, output: &str) -> TestCounts {
        let mut counts = TestCounts::default();
        for line in output.lines() {
            if line.contains("PASS") {
                counts.passed += 1;
            }
            if line.contains("FAIL") {
                counts.failed += 1;
            }
        }

        if counts.passed == 0 && counts.failed == 0 {
            counts.passed = 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_markers_per_line() {
        let counts = MarkerClassifier.classify("PASS add\nFAIL sub\nPASS mul\nnoise\n");
        assert_eq!(counts, TestCounts { passed: 2, failed: 1 });
    }

    #[test]
    fn test_markers_are_case_sensitive_substrings() {
        let counts = MarkerClassifier.classify("test_add ... PASSED\npass\nfailure\n");
        assert_eq!(counts, TestCounts { passed: 1, failed: 0 });
    }

    #[test]
    fn test_no_markers_is_implicit_pass() {
        assert_eq!(
            MarkerClassifier.classify("3\n"),
            TestCounts { passed: 1, failed: 0 }
        );
        assert_eq!(
            MarkerClassifier.classify(""),
            TestCounts { passed: 1, failed: 0 }
        );
    }

    #[test]
    fn test_only_failures() {
        assert_eq!(
            MarkerClassifier.classify("FAIL one\nFAIL two"),
            TestCounts { passed: 0, failed: 2 }
        );
    }
}
