//! Git queries against the source checkout.

use std::path::Path;

use crate::error::{Result, WheelCiError};
use crate::runner::CommandExecutor;
use crate::stage::{BuiltinStage, StageConfig};

/// Branch name reported for a detached HEAD.
pub const DETACHED_HEAD: &str = "HEAD";

/// Branch a detached HEAD is treated as.
pub const DETACHED_HEAD_BRANCH: &str = "master";

/// Capture the checked-out branch of the repository at `repo_dir`.
///
/// Runs `git rev-parse --abbrev-ref HEAD`. A detached HEAD, the usual state
/// of a CI checkout, is reported as `master`.
pub async fn current_branch(executor: &dyn CommandExecutor, repo_dir: &Path) -> Result<String> {
    let stage = StageConfig::from_builtin(BuiltinStage::GitBranch, ["rev-parse", "--abbrev-ref", "HEAD"])
        .in_dir(repo_dir);
    let output = executor.run(&stage).await?;

    let branch = output.stdout.trim();
    if branch.is_empty() {
        return Err(WheelCiError::Git(
            "git rev-parse --abbrev-ref HEAD returned empty output".to_string(),
        ));
    }

    if branch == DETACHED_HEAD {
        Ok(DETACHED_HEAD_BRANCH.to_string())
    } else {
        Ok(branch.to_string())
    }
}

/// Capture the committer date of HEAD as `YYYY-MM-DD`.
pub async fn head_commit_date(executor: &dyn CommandExecutor, repo_dir: &Path) -> Result<String> {
    let stage = StageConfig::from_builtin(BuiltinStage::GitCommitDate, ["log", "--pretty=format:%cs", "-1"])
        .in_dir(repo_dir);
    let output = executor.run(&stage).await?;

    let date = output.stdout.trim();
    if date.is_empty() {
        return Err(WheelCiError::Git(
            "git log returned no commit date".to_string(),
        ));
    }

    Ok(date.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingExecutor;
    use crate::runner::ProcessRunner;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["checkout", "-b", "nightly"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[tokio::test]
    async fn detached_head_is_master() {
        let fake = RecordingExecutor::new().with_stdout("git_branch", "HEAD\n");
        let branch = current_branch(&fake, Path::new("/pytorch")).await.unwrap();
        assert_eq!(branch, "master");

        let call = fake.last_call("git_branch").unwrap();
        assert_eq!(call.command, vec!["git", "rev-parse", "--abbrev-ref", "HEAD"]);
        assert_eq!(call.cwd.as_deref(), Some(Path::new("/pytorch")));
    }

    #[tokio::test]
    async fn named_branch_is_trimmed() {
        let fake = RecordingExecutor::new().with_stdout("git_branch", "v2.1.0-rc1\n");
        let branch = current_branch(&fake, Path::new("/pytorch")).await.unwrap();
        assert_eq!(branch, "v2.1.0-rc1");
    }

    #[tokio::test]
    async fn empty_branch_is_an_error() {
        let fake = RecordingExecutor::new();
        let err = current_branch(&fake, Path::new("/pytorch")).await.unwrap_err();
        assert!(matches!(err, WheelCiError::Git(_)));
    }

    #[tokio::test]
    async fn git_failure_propagates() {
        let fake = RecordingExecutor::new().failing("git_commit_date", 128);
        let err = head_commit_date(&fake, Path::new("/pytorch")).await.unwrap_err();
        assert!(matches!(err, WheelCiError::CommandFailed { code: 128, .. }));
    }

    #[tokio::test]
    async fn reads_branch_and_date_from_real_repo() {
        let repo = make_git_repo();

        let branch = current_branch(&ProcessRunner, repo.path()).await.unwrap();
        assert_eq!(branch, "nightly");

        let date = head_commit_date(&ProcessRunner, repo.path()).await.unwrap();
        assert_eq!(date.len(), 10, "expected YYYY-MM-DD, got: {date}");
        assert_eq!(date.matches('-').count(), 2);
    }
}
