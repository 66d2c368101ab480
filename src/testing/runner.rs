//! Runs generated code plus a test snippet in a child process.
//!
//! The combined source is written to a uniquely named temporary file that is
//! removed when the run finishes, whatever the outcome. Execution is bounded
//! by a wall-clock timeout and an output cap; the child is killed if either
//! is exceeded.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use super::classify::{MarkerClassifier, OutputClassifier};
use crate::language::{file_extension, line_comment};
use crate::metrics::MetricsCollector;

/// Default wall-clock limit for one test execution.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on captured stdout and stderr, per stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Outcome of one test execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub duration_ms: u64,
    /// Captured stdout.
    pub output: String,
    pub errors: Vec<String>,
}

impl TestResult {
    /// Single synthetic failure carrying the error text.
    pub fn failure(error: impl Into<String>, duration: Duration, output: String) -> Self {
        Self {
            passed: 0,
            failed: 1,
            total: 1,
            duration_ms: duration.as_millis() as u64,
            output,
            errors: vec![error.into()],
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.passed > 0
    }
}

/// Why an execution produced no classifiable output.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unsupported language for test execution: {0}")]
    UnsupportedLanguage(String),

    #[error("test execution timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("test output exceeded {0} bytes")]
    OutputOverflow(usize),

    #[error("test process exited with {status}: {stderr}")]
    NonZeroExit { status: ExitStatus, stderr: String },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error during test execution: {0}")]
    Io(#[from] std::io::Error),
}

/// Interpreter (and leading arguments) used to run a source file.
pub fn runtime_command(language: &str) -> Option<(&'static str, &'static [&'static str])> {
    match language {
        "python" => Some(("python3", &[])),
        "javascript" => Some(("node", &[])),
        "typescript" => Some(("ts-node", &[])),
        // Single-file source launch, no separate javac step
        "java" => Some(("java", &[])),
        "bash" => Some(("bash", &[])),
        "ruby" => Some(("ruby", &[])),
        "go" => Some(("go", &["run"])),
        _ => None,
    }
}

/// Candidate code followed by the tests, separated by a comment line.
pub fn combine_code_with_tests(code: &str, test_code: &str, language: &str) -> String {
    format!(
        "{}\n\n{} TESTS\n{}\n",
        code.trim_end(),
        line_comment(language),
        test_code.trim_end()
    )
}

/// Limits for test execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunnerConfig {
    pub timeout: Duration,
    pub max_output_bytes: usize,
    /// Directory for temporary source files; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for TestRunnerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TEST_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            scratch_dir: None,
        }
    }
}

/// Executes candidate code against test code.
#[derive(Clone)]
pub struct TestRunner {
    config: TestRunnerConfig,
    classifier: Arc<dyn OutputClassifier>,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("config", &self.config)
            .finish()
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new(TestRunnerConfig::default())
    }
}

impl TestRunner {
    pub fn new(config: TestRunnerConfig) -> Self {
        Self {
            config,
            classifier: Arc::new(MarkerClassifier),
            metrics: MetricsCollector::new(),
        }
    }

    /// Replace the PASS/FAIL marker classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn OutputClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &TestRunnerConfig {
        &self.config
    }

    /// Runs `code` followed by `test_code` and classifies the output.
    ///
    /// Never fails: execution problems become a single synthetic failure.
    pub async fn run(&self, code: &str, language: &str, test_code: &str) -> TestResult {
        let start = Instant::now();

        let result = match self.execute(code, language, test_code).await {
            Ok((stdout, stderr)) => {
                let counts = self.classifier.classify(&stdout);
                TestResult {
                    passed: counts.passed,
                    failed: counts.failed,
                    total: counts.passed + counts.failed,
                    duration_ms: start.elapsed().as_millis() as u64,
                    output: stdout,
                    errors: if stderr.trim().is_empty() {
                        Vec::new()
                    } else {
                        vec![stderr]
                    },
                }
            }
            Err((err, stdout)) => {
                tracing::error!(language = language, error = %err, "Test execution failed");
                self.metrics.record_test_execution("error");
                return TestResult::failure(err.to_string(), start.elapsed(), stdout);
            }
        };

        self.metrics.record_test_execution(if result.failed == 0 {
            "passed"
        } else {
            "failed"
        });
        tracing::info!(
            language = language,
            passed = result.passed,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "Test execution finished"
        );
        result
    }

    /// Writes the combined source to a temp file and runs it.
    ///
    /// On failure the stdout captured so far (possibly empty) is returned
    /// with the error.
    async fn execute(
        &self,
        code: &str,
        language: &str,
        test_code: &str,
    ) -> Result<(String, String), (ExecutionError, String)> {
        let (program, args) = runtime_command(language).ok_or_else(|| {
            (
                ExecutionError::UnsupportedLanguage(language.to_string()),
                String::new(),
            )
        })?;

        // Deleted when `file` drops, on every return path below
        let suffix = format!(".{}", file_extension(language));
        let mut builder = tempfile::Builder::new();
        builder.prefix("codeforge-test-").suffix(&suffix);
        let file = match &self.config.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| (ExecutionError::Io(e), String::new()))?;
        tokio::fs::write(file.path(), combine_code_with_tests(code, test_code, language))
            .await
            .map_err(|e| (ExecutionError::Io(e), String::new()))?;

        tracing::debug!(
            program = program,
            path = %file.path().display(),
            "Launching test process"
        );

        let child = Command::new(program)
            .args(args)
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                (
                    ExecutionError::Launch {
                        program: program.to_string(),
                        source,
                    },
                    String::new(),
                )
            })?;

        let captured = match tokio::time::timeout(
            self.config.timeout,
            collect(child, self.config.max_output_bytes),
        )
        .await
        {
            Ok(Ok(captured)) => captured,
            Ok(Err(io)) => return Err((ExecutionError::Io(io), String::new())),
            Err(_) => return Err((ExecutionError::Timeout(self.config.timeout), String::new())),
        };

        match captured.outcome {
            Ok(()) => Ok((captured.stdout, captured.stderr)),
            Err(err) => Err((err, captured.stdout)),
        }
    }
}

/// Output of a finished (or killed) child.
struct Captured {
    stdout: String,
    stderr: String,
    outcome: Result<(), ExecutionError>,
}

/// Drains both pipes under the output cap, then waits for exit.
///
/// Dropping `child` early (overflow, or the caller's timeout) kills it.
async fn collect(mut child: Child, cap: usize) -> std::io::Result<Captured> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (out, err) = tokio::try_join!(read_capped(stdout, cap), read_capped(stderr, cap))?;

    let stdout = String::from_utf8_lossy(&out.0).into_owned();
    let stderr = String::from_utf8_lossy(&err.0).into_owned();
    if out.1 || err.1 {
        return Ok(Captured {
            stdout,
            stderr,
            outcome: Err(ExecutionError::OutputOverflow(cap)),
        });
    }

    let status = child.wait().await?;
    let outcome = if status.success() {
        Ok(())
    } else {
        Err(ExecutionError::NonZeroExit {
            status,
            stderr: stderr.trim().to_string(),
        })
    };
    Ok(Captured {
        stdout,
        stderr,
        outcome,
    })
}

/// Reads at most `cap` bytes; the flag reports whether more were available.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok((Vec::new(), false));
    };
    let mut buf = Vec::new();
    reader.take(cap as u64 + 1).read_to_end(&mut buf).await?;
    let overflow = buf.len() > cap;
    buf.truncate(cap);
    Ok((buf, overflow))
}
