//! In-memory fakes for the executor seam (testing only)
//!
//! `RecordingExecutor` records every stage it is asked to run and answers
//! with scripted output instead of spawning processes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::{CommandExecutor, StageResult};
use crate::stage::StageConfig;

type StageHook = Box<dyn Fn(&StageConfig) -> std::io::Result<()> + Send + Sync>;

/// Executor that records calls and never spawns a process.
///
/// Stages are matched by name. Unscripted stages succeed with empty output.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<StageConfig>>,
    stdout: HashMap<String, String>,
    exit_codes: HashMap<String, i32>,
    hooks: HashMap<String, StageHook>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to stage `name` with `stdout`.
    pub fn with_stdout(mut self, name: &str, stdout: &str) -> Self {
        self.stdout.insert(name.to_string(), stdout.to_string());
        self
    }

    /// Make stage `name` exit with `code`.
    pub fn failing(mut self, name: &str, code: i32) -> Self {
        self.exit_codes.insert(name.to_string(), code);
        self
    }

    /// Run `hook` whenever stage `name` executes, standing in for the
    /// tool's filesystem side effects.
    pub fn on_stage<F>(mut self, name: &str, hook: F) -> Self
    where
        F: Fn(&StageConfig) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.hooks.insert(name.to_string(), Box::new(hook));
        self
    }

    /// All stages executed so far, in order.
    pub fn calls(&self) -> Vec<StageConfig> {
        self.calls.lock().unwrap().clone()
    }

    /// Names of all stages executed so far, in order.
    pub fn stage_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// The most recent call of stage `name`.
    pub fn last_call(&self, name: &str) -> Option<StageConfig> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.name == name)
            .cloned()
    }
}

impl std::fmt::Debug for RecordingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingExecutor")
            .field("calls", &self.stage_names())
            .field("exit_codes", &self.exit_codes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, config: &StageConfig) -> Result<StageResult> {
        self.calls.lock().unwrap().push(config.clone());

        if let Some(hook) = self.hooks.get(&config.name) {
            hook(config)?;
        }

        let exit_code = self.exit_codes.get(&config.name).copied().unwrap_or(0);
        Ok(StageResult {
            stage_name: config.name.clone(),
            command: config.display_command(),
            exit_code,
            stdout: self.stdout.get(&config.name).cloned().unwrap_or_default(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{} failed", config.name)
            },
            duration_ms: 0,
            success: exit_code == 0,
        })
    }
}
