//! External stage execution.

use crate::error::{Result, WheelCiError};
use crate::stage::{OutputMode, StageConfig};
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Command line as rendered for logs.
    pub command: String,

    /// Exit code (0 = success, -1 = killed by signal).
    pub exit_code: i32,

    /// Captured stdout (empty when output is inherited).
    #[serde(skip)]
    pub stdout: String,

    /// Captured stderr (empty when output is inherited).
    #[serde(skip)]
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Turn a failed result into [`WheelCiError::CommandFailed`].
    pub fn check(self) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(WheelCiError::CommandFailed {
                stage: self.stage_name,
                code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Executes stages. Implemented by [`ProcessRunner`] for real runs and by
/// [`crate::fakes::RecordingExecutor`] in tests.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a stage and return its result regardless of exit status.
    async fn execute(&self, config: &StageConfig) -> Result<StageResult>;

    /// Execute a stage and fail unless it exits with code 0.
    async fn run(&self, config: &StageConfig) -> Result<StageResult> {
        let result = self.execute(config).await?;
        if !result.passed() {
            error!(
                stage = %result.stage_name,
                exit_code = result.exit_code,
                stderr = %result.stderr.trim(),
                "Stage failed"
            );
        }
        result.check()
    }
}

/// Runs stages as child processes of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandExecutor for ProcessRunner {
    async fn execute(&self, config: &StageConfig) -> Result<StageResult> {
        let start = Instant::now();

        let Some(program) = config.program() else {
            return Err(WheelCiError::EmptyCommand(config.name.clone()));
        };
        let args = &config.command[1..];
        let rendered = config.display_command();

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }
        match config.output {
            OutputMode::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        info!(stage = %config.name, command = %rendered, cwd = ?config.cwd, "Executing stage");

        let child = command.spawn().map_err(|source| WheelCiError::Spawn {
            stage: config.name.clone(),
            program: program.to_string(),
            source,
        })?;

        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| WheelCiError::Timeout {
                stage: config.name.clone(),
                timeout_secs: config.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(stage = %config.name, exit_code, duration_ms, "Stage finished");

        Ok(StageResult {
            stage_name: config.name.clone(),
            command: rendered,
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success: output.status.success(),
        })
    }
}

/// Wraps an executor and keeps every stage result for the build report.
///
/// Stages without their own timeout inherit `default_timeout_secs`.
pub struct StageRecorder<'a> {
    inner: &'a dyn CommandExecutor,
    default_timeout_secs: u64,
    results: Mutex<Vec<StageResult>>,
}

impl<'a> StageRecorder<'a> {
    pub fn new(inner: &'a dyn CommandExecutor) -> Self {
        Self {
            inner,
            default_timeout_secs: 0,
            results: Mutex::new(Vec::new()),
        }
    }

    /// Apply `timeout_secs` to stages that do not set one.
    pub fn with_default_timeout(mut self, timeout_secs: u64) -> Self {
        self.default_timeout_secs = timeout_secs;
        self
    }

    /// Results recorded so far, in execution order.
    pub fn results(&self) -> Vec<StageResult> {
        match self.results.lock() {
            Ok(results) => results.clone(),
            Err(poisoned) => {
                warn!("Stage result log was poisoned, reporting what was recorded");
                poisoned.into_inner().clone()
            }
        }
    }
}

#[async_trait]
impl<'a> CommandExecutor for StageRecorder<'a> {
    async fn execute(&self, config: &StageConfig) -> Result<StageResult> {
        let result = if config.timeout_secs == 0 && self.default_timeout_secs > 0 {
            let config = config.clone().with_timeout(self.default_timeout_secs);
            self.inner.execute(&config).await?
        } else {
            self.inner.execute(config).await?
        };

        self.results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(result.clone());
        Ok(result)
    }
}
