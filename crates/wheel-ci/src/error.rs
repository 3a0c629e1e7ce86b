//! Error types for wheel CI operations

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WheelCiError {
    /// An external tool ran but exited unsuccessfully
    #[error("Stage '{stage}' exited with code {code}")]
    CommandFailed {
        stage: String,
        code: i32,
        stderr: String,
    },

    /// An external tool could not be started at all
    #[error("Failed to spawn '{program}' for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage '{stage}' timed out after {timeout_secs} seconds")]
    Timeout { stage: String, timeout_secs: u64 },

    #[error("Stage '{0}' has empty command")]
    EmptyCommand(String),

    /// Artifact directory is missing or holds no entries
    #[error("No artifact found in {}", .0.display())]
    NoArtifact(PathBuf),

    /// Artifact directory holds more than one entry
    #[error(
        "Expected exactly one artifact in {}, found {}: {}",
        .dir.display(),
        .entries.len(),
        .entries.join(", ")
    )]
    AmbiguousArtifact { dir: PathBuf, entries: Vec<String> },

    #[error("Library to bundle not found: {}", .0.display())]
    MissingLibrary(PathBuf),

    #[error("Patch target not found: {}", .0.display())]
    PatchTarget(PathBuf),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Version error: {0}")]
    Version(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for wheel CI operations
pub type Result<T> = std::result::Result<T, WheelCiError>;
