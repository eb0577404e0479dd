//! Read-only local repository tools exposed next to the forge tools.

use crate::error::{GitError, GitResult};
use crate::git::executor::GitExecutor;
use crate::git::parser::{
    BranchEntry, CommitEntry, LOG_FORMAT, StatusReport, parse_branch_list, parse_log,
    parse_status_porcelain_v2,
};
use crate::safety::validate_safe_path;

pub const DEFAULT_LOG_LIMIT: usize = 20;
pub const MAX_LOG_LIMIT: usize = 200;

/// Local git queries over one repository
#[derive(Debug, Clone)]
pub struct LocalGit {
    executor: GitExecutor,
}

impl LocalGit {
    pub fn new(executor: GitExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &GitExecutor {
        &self.executor
    }

    pub async fn status(&self) -> GitResult<StatusReport> {
        let output = self
            .executor
            .execute(&["status", "--porcelain=v2", "--branch"])
            .await?;
        parse_status_porcelain_v2(&output.stdout)
    }

    /// Most recent commits, newest first; empty on a repository without any
    pub async fn log(&self, limit: usize, path: Option<&str>) -> GitResult<Vec<CommitEntry>> {
        let limit = limit.clamp(1, MAX_LOG_LIMIT).to_string();
        let mut args = vec!["log", "-n", limit.as_str(), LOG_FORMAT];
        if let Some(path) = path {
            validate_safe_path(path)?;
            args.extend(["--", path]);
        }

        match self.executor.execute(&args).await {
            Ok(output) => parse_log(&output.stdout),
            Err(GitError::CommandFailed(msg)) if msg.contains("does not have any commits") => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn diff(&self, staged: bool, path: Option<&str>) -> GitResult<String> {
        let mut args = vec!["diff", "--no-color"];
        if staged {
            args.push("--cached");
        }
        if let Some(path) = path {
            validate_safe_path(path)?;
            args.extend(["--", path]);
        }

        Ok(self.executor.execute(&args).await?.stdout)
    }

    pub async fn branch_list(&self) -> GitResult<Vec<BranchEntry>> {
        let output = self.executor.execute(&["branch", "-v", "--no-color"]).await?;
        parse_branch_list(&output.stdout)
    }

    /// `None` on a detached HEAD
    pub async fn current_branch(&self) -> GitResult<Option<String>> {
        let output = self.executor.execute(&["branch", "--show-current"]).await?;
        let name = output.stdout.trim();
        Ok((!name.is_empty()).then(|| name.to_string()))
    }
}
