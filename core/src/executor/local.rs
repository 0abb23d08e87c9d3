use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use super::{BuildOutcome, ExecError, Executor, FormatOutcome, TestOutcome, validate_file_name};
use crate::model::Code;

/// Commands run by [`LocalExecutor`], split on whitespace (no shell).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Prints a diff of unformatted code; empty output means formatted
    pub format_check: String,
    /// Rewrites files in place
    pub format_fix: String,
    pub build: String,
    /// Test flags from the run request are appended
    pub test: String,
    /// Budget per step
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            format_check: "gofmt -d .".to_string(),
            format_fix: "gofmt -w .".to_string(),
            build: "go build ./...".to_string(),
            test: "go test ./...".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Runs each step as a local process inside a fresh temp directory holding
/// the snapshot. The directory is removed when the step finishes.
pub struct LocalExecutor {
    config: ExecutorConfig,
}

struct StepOutput {
    success: bool,
    output: String,
    elapsed: Duration,
}

impl LocalExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    async fn materialize(&self, code: &Code) -> Result<tempfile::TempDir, ExecError> {
        for name in code.keys() {
            validate_file_name(name)?;
        }
        let dir = tempfile::Builder::new().prefix("tutor-exec-").tempdir()?;
        for (name, content) in code {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content).await?;
        }
        Ok(dir)
    }

    async fn run_step(
        &self,
        dir: &Path,
        label: &'static str,
        command: &str,
        extra_args: &[String],
    ) -> Result<StepOutput, ExecError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(ExecError::NotConfigured(label))?;

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .args(extra_args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let start = Instant::now();
        match tokio::time::timeout(self.config.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.is_empty() {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }
                Ok(StepOutput {
                    success: output.status.success(),
                    output: text,
                    elapsed: start.elapsed(),
                })
            }
            Ok(Err(e)) => Err(ExecError::Spawn {
                command: command.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => {
                tracing::warn!(step = label, timeout_secs = self.config.timeout.as_secs(), "execution step timed out");
                Ok(StepOutput {
                    success: false,
                    output: format!(
                        "{label} timed out after {}s",
                        self.config.timeout.as_secs_f32()
                    ),
                    elapsed: start.elapsed(),
                })
            }
        }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn run_format(&self, code: &Code) -> Result<FormatOutcome, ExecError> {
        let dir = self.materialize(code).await?;
        let step = self
            .run_step(dir.path(), "format", &self.config.format_check, &[])
            .await?;
        Ok(FormatOutcome {
            ok: step.success && step.output.trim().is_empty(),
            diff: step.output,
        })
    }

    async fn run_format_fix(&self, code: &Code) -> Result<Code, ExecError> {
        let dir = self.materialize(code).await?;
        let step = self
            .run_step(dir.path(), "format fix", &self.config.format_fix, &[])
            .await?;
        if !step.success {
            return Err(ExecError::StepFailed {
                step: "format fix",
                output: step.output,
            });
        }

        let mut fixed = Code::new();
        for (name, original) in code {
            let content = match tokio::fs::read_to_string(dir.path().join(name)).await {
                Ok(content) => content,
                Err(_) => original.clone(),
            };
            fixed.insert(name.clone(), content);
        }
        Ok(fixed)
    }

    async fn run_build(&self, code: &Code) -> Result<BuildOutcome, ExecError> {
        let dir = self.materialize(code).await?;
        let step = self
            .run_step(dir.path(), "build", &self.config.build, &[])
            .await?;
        Ok(BuildOutcome {
            ok: step.success,
            output: step.output,
        })
    }

    async fn run_tests(&self, code: &Code, flags: &[String]) -> Result<TestOutcome, ExecError> {
        let dir = self.materialize(code).await?;
        let step = self
            .run_step(dir.path(), "test", &self.config.test, flags)
            .await?;
        Ok(TestOutcome {
            ok: step.success,
            output: step.output,
            duration_ms: step.elapsed.as_millis().min(u128::from(u64::MAX)) as u64,
        })
    }
}
