use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{GitError, GitResult};
use crate::safety::validate_safe_input;

/// Subcommands the local tools may run; all of them read-only
pub const ALLOWED_GIT_SUBCOMMANDS: &[&str] = &["status", "log", "diff", "branch", "rev-parse"];

/// Variables that would let the caller's environment run arbitrary programs
/// on git's behalf
const SCRUBBED_ENV_VARS: &[&str] = &[
    "GIT_SSH",
    "GIT_SSH_COMMAND",
    "GIT_EXTERNAL_DIFF",
    "GIT_PAGER",
    "GIT_EDITOR",
    "GIT_ASKPASS",
    "GIT_PROXY_COMMAND",
    "GIT_EXEC_PATH",
    "GIT_CONFIG_PARAMETERS",
    "GIT_DIR",
    "GIT_WORK_TREE",
];

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Result of executing a git command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
}

/// Executes git commands within a repository
#[derive(Debug, Clone)]
pub struct GitExecutor {
    repo_path: PathBuf,
    timeout: Duration,
}

impl GitExecutor {
    /// Create a new GitExecutor for the given repository path
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `git <args...>` without a shell
    ///
    /// The subcommand must be on the allowlist and every argument must be
    /// free of shell metacharacters.
    pub async fn execute(&self, args: &[&str]) -> GitResult<CommandOutput> {
        let Some(subcommand) = args.first() else {
            return Err(GitError::CommandFailed("Empty command".to_string()));
        };
        if !ALLOWED_GIT_SUBCOMMANDS.contains(subcommand) {
            return Err(GitError::SubcommandNotAllowed(subcommand.to_string()));
        }
        for arg in args {
            validate_safe_input(arg)?;
        }

        let mut command = Command::new("git");
        command
            .arg("--no-pager")
            .args(args)
            .current_dir(&self.repo_path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in SCRUBBED_ENV_VARS {
            command.env_remove(var);
        }

        debug!(args = ?args, repo = %self.repo_path.display(), "running git");

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| GitError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| GitError::CommandFailed(format!("Failed to execute git: {}", e)))?;

        self.process_output(output, args)
    }

    /// Process command output into CommandOutput struct
    fn process_output(&self, output: Output, args: &[&str]) -> GitResult<CommandOutput> {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);
        let success = output.status.success();

        if !success {
            if stderr.contains("not a git repository") {
                return Err(GitError::NotARepository(
                    self.repo_path.display().to_string(),
                ));
            }
            return Err(GitError::CommandFailed(format!(
                "Command 'git {}' failed with exit code {}: {}",
                args.join(" "),
                exit_code,
                stderr.trim()
            )));
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            success,
        })
    }

    /// Get the repository path
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn create_test_repo() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let repo_path = temp_dir.path().to_path_buf();

        for args in [
            &["init", "-b", "main"][..],
            &["config", "user.name", "Test User"],
            &["config", "user.email", "test@example.com"],
        ] {
            std::process::Command::new("git")
                .args(args)
                .current_dir(&repo_path)
                .output()
                .unwrap();
        }

        (temp_dir, repo_path)
    }

    #[tokio::test]
    async fn test_execute_status() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        let output = executor.execute(&["status", "--porcelain"]).await.unwrap();
        assert!(output.success);
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_execute_log_empty_repo() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        // No commits yet
        let result = executor.execute(&["log", "--oneline"]).await;
        assert!(matches!(result, Err(GitError::CommandFailed(_))));
    }

    #[tokio::test]
    async fn test_rejects_write_subcommands() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        for sub in ["push", "commit", "config", "filter-branch"] {
            let result = executor.execute(&[sub]).await;
            assert!(matches!(result, Err(GitError::SubcommandNotAllowed(_))));
        }
    }

    #[tokio::test]
    async fn test_rejects_metacharacters() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        let result = executor.execute(&["status", "$(whoami)"]).await;
        assert!(matches!(result, Err(GitError::UnsafeArgument(_))));

        let result = executor.execute(&["log", "main;rm"]).await;
        assert!(matches!(result, Err(GitError::UnsafeArgument(_))));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        assert!(executor.execute(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_not_a_repository() {
        let temp_dir = TempDir::new().unwrap();
        let executor = GitExecutor::new(temp_dir.path());

        let result = executor.execute(&["status"]).await;
        assert!(matches!(result, Err(GitError::NotARepository(_))));
    }

    #[test]
    fn test_repo_path_and_timeout() {
        let executor = GitExecutor::new("/srv/repo").with_timeout(Duration::from_secs(5));

        assert_eq!(executor.repo_path(), Path::new("/srv/repo"));
        assert_eq!(executor.timeout(), Duration::from_secs(5));
    }
}
