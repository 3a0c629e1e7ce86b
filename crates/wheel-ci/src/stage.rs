//! Stage definitions for the external tools driven by the wheel build.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Builtin stages, one per external tool invocation in the wheel build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// git rev-parse --abbrev-ref HEAD
    GitBranch,

    /// git log --pretty=format:%cs -1
    GitCommitDate,

    /// git clone of the Arm Compute Library
    AclClone,

    /// scons build of the Arm Compute Library
    AclScons,

    /// python setup.py clean
    SetupClean,

    /// python3 setup.py bdist_wheel
    BdistWheel,

    /// auditwheel repair dist/<wheel>
    AuditwheelRepair,

    /// unzip <wheel> -d tmp
    UnzipWheel,

    /// patchelf --set-rpath '$ORIGIN' libtorch_cuda.so
    PatchelfRpath,

    /// zip -r new_wheel/<wheel> .
    ZipWheel,
}

impl BuiltinStage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::GitBranch => "git_branch",
            BuiltinStage::GitCommitDate => "git_commit_date",
            BuiltinStage::AclClone => "acl_clone",
            BuiltinStage::AclScons => "acl_scons",
            BuiltinStage::SetupClean => "setup_clean",
            BuiltinStage::BdistWheel => "bdist_wheel",
            BuiltinStage::AuditwheelRepair => "auditwheel_repair",
            BuiltinStage::UnzipWheel => "unzip_wheel",
            BuiltinStage::PatchelfRpath => "patchelf_rpath",
            BuiltinStage::ZipWheel => "zip_wheel",
        }
    }

    /// Get the executable this stage invokes.
    pub fn program(&self) -> &'static str {
        match self {
            BuiltinStage::GitBranch | BuiltinStage::GitCommitDate | BuiltinStage::AclClone => "git",
            BuiltinStage::AclScons => "scons",
            BuiltinStage::SetupClean => "python",
            BuiltinStage::BdistWheel => "python3",
            BuiltinStage::AuditwheelRepair => "auditwheel",
            BuiltinStage::UnzipWheel => "unzip",
            BuiltinStage::PatchelfRpath => "patchelf",
            BuiltinStage::ZipWheel => "zip",
        }
    }
}

/// How a stage's stdout/stderr are handled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Capture output so the caller can read it.
    #[default]
    Capture,

    /// Stream output straight to the CI log.
    Inherit,
}

/// Configuration for a single external invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Working directory; inherits the process cwd when unset.
    pub cwd: Option<PathBuf>,

    /// Extra environment variables, applied in order.
    pub env: Vec<(String, String)>,

    /// Output handling.
    pub output: OutputMode,

    /// Timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,
}

impl StageConfig {
    /// Create a stage from a builtin, appending `args` to its program.
    pub fn from_builtin<I, S>(stage: BuiltinStage, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut command = vec![stage.program().to_string()];
        command.extend(args.into_iter().map(Into::into));
        Self::custom(stage.name().to_string(), command)
    }

    /// Create a custom stage configuration.
    pub fn custom(name: String, command: Vec<String>) -> Self {
        Self {
            name,
            command,
            cwd: None,
            env: Vec::new(),
            output: OutputMode::Capture,
            timeout_secs: 0,
        }
    }

    /// Run the stage in `dir`.
    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add environment variables to the stage.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Stream output to the terminal instead of capturing it.
    pub fn inherit_output(mut self) -> Self {
        self.output = OutputMode::Inherit;
        self
    }

    /// Set a timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Executable name, if the command is non-empty.
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    /// Command line rendered for logs, quoting arguments that contain whitespace.
    pub fn display_command(&self) -> String {
        self.command
            .iter()
            .map(|arg| quote_arg(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote `value` for display when it is empty or contains whitespace or quotes.
pub(crate) fn quote_arg(value: &str) -> String {
    if !value.is_empty() && !value.chars().any(|c| c.is_whitespace() || c == '"') {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_stage_names() {
        assert_eq!(BuiltinStage::GitBranch.name(), "git_branch");
        assert_eq!(BuiltinStage::BdistWheel.name(), "bdist_wheel");
        assert_eq!(BuiltinStage::AuditwheelRepair.name(), "auditwheel_repair");
        assert_eq!(BuiltinStage::PatchelfRpath.name(), "patchelf_rpath");
    }

    #[test]
    fn test_builtin_stage_programs() {
        assert_eq!(BuiltinStage::SetupClean.program(), "python");
        assert_eq!(BuiltinStage::BdistWheel.program(), "python3");
        assert_eq!(BuiltinStage::AclScons.program(), "scons");
        assert_eq!(BuiltinStage::ZipWheel.program(), "zip");
    }

    #[test]
    fn test_stage_config_from_builtin() {
        let config = StageConfig::from_builtin(BuiltinStage::BdistWheel, ["setup.py", "bdist_wheel"]);
        assert_eq!(config.name, "bdist_wheel");
        assert_eq!(config.command, vec!["python3", "setup.py", "bdist_wheel"]);
        assert_eq!(config.output, OutputMode::Capture);
        assert_eq!(config.timeout_secs, 0);
        assert!(config.cwd.is_none());
    }

    #[test]
    fn test_stage_config_builders() {
        let config = StageConfig::custom(
            "my_stage".to_string(),
            vec!["echo".to_string(), "hello".to_string()],
        )
        .in_dir("/tmp")
        .with_env([("A", "1"), ("B", "2")])
        .inherit_output()
        .with_timeout(60);

        assert_eq!(config.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(
            config.env,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
        assert_eq!(config.output, OutputMode::Inherit);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.program(), Some("echo"));
    }

    #[test]
    fn test_display_command_quotes_whitespace() {
        let config = StageConfig::custom(
            "echo".to_string(),
            vec!["echo".to_string(), "two words".to_string(), "plain".to_string()],
        );
        assert_eq!(config.display_command(), "echo \"two words\" plain");
    }

    #[test]
    fn test_empty_command_has_no_program() {
        let config = StageConfig::custom("empty".to_string(), Vec::new());
        assert!(config.program().is_none());
        assert_eq!(config.display_command(), "");
    }
}
