//! Test suite lookup by id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::StageError;
use crate::language::file_extension;

static SUITE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid regex for suite ids"));

/// Checks that a suite id is a plain name and cannot escape the suite root.
pub fn validate_suite_id(suite_id: &str) -> Result<(), StageError> {
    if SUITE_ID.is_match(suite_id) {
        Ok(())
    } else {
        Err(StageError::TestSuite(format!(
            "invalid test suite id '{}': expected [A-Za-z0-9_-]+",
            suite_id
        )))
    }
}

/// Resolves a test-suite reference to test source code.
#[async_trait]
pub trait TestSuiteSource: Send + Sync {
    /// Loads the suite for `language`.
    ///
    /// # Errors
    ///
    /// `StageError::TestSuite` when the id is invalid or unknown.
    async fn load(&self, suite_id: &str, language: &str) -> Result<String, StageError>;
}

/// Suites stored as files under a root directory.
///
/// `<root>/<id>.<ext>` is tried first, then `<root>/<id>`.
#[derive(Debug, Clone)]
pub struct DirectorySuiteSource {
    root: PathBuf,
}

impl DirectorySuiteSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl TestSuiteSource for DirectorySuiteSource {
    async fn load(&self, suite_id: &str, language: &str) -> Result<String, StageError> {
        validate_suite_id(suite_id)?;

        let candidates = [
            self.root
                .join(format!("{}.{}", suite_id, file_extension(language))),
            self.root.join(suite_id),
        ];

        for path in &candidates {
            match tokio::fs::read_to_string(path).await {
                Ok(code) => {
                    tracing::debug!(suite_id = suite_id, path = %path.display(), "Loaded test suite");
                    return Ok(code);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StageError::TestSuite(format!(
                        "failed to read test suite '{}': {}",
                        suite_id, e
                    )))
                }
            }
        }

        Err(StageError::TestSuite(format!(
            "test suite '{}' not found under {}",
            suite_id,
            self.root.display()
        )))
    }
}

/// In-memory suites, keyed by id regardless of language.
#[derive(Debug, Clone, Default)]
pub struct StaticSuiteSource {
    suites: HashMap<String, String>,
}

impl StaticSuiteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suite(mut self, suite_id: impl Into<String>, test_code: impl Into<String>) -> Self {
        self.suites.insert(suite_id.into(), test_code.into());
        self
    }
}

#[async_trait]
impl TestSuiteSource for StaticSuiteSource {
    async fn load(&self, suite_id: &str, _language: &str) -> Result<String, StageError> {
        self.suites
            .get(suite_id)
            .cloned()
            .ok_or_else(|| StageError::TestSuite(format!("test suite '{}' not found", suite_id)))
    }
}
