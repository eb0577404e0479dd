//! Routes `tools/call` to the safety layer, the forge client and local git.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::GitError;
use crate::forge::{ForgeClient, ForgeError};
use crate::git::LocalGit;
use crate::git::tools::DEFAULT_LOG_LIMIT;
use crate::safety::{
    Executed, Guarded, Params, SafetyCheck, SafetyError, SafetyMode, SafetyPolicy, risk,
    sanitize_params,
};
use crate::server::protocol::{ToolCallResult, ToolDefinition};
use crate::server::tools::{self, canonical_name, is_git_tool};

/// Keys that steer the safety layer rather than describe the change
const CONTROL_KEYS: &[&str] = &["dry_run", "confirmation_token"];

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid argument '{0}': {1}")]
    InvalidArgument(String, String),
}

/// Executes tool calls on behalf of the JSON-RPC server
pub struct ToolDispatcher {
    policy: Arc<SafetyPolicy>,
    forge: Arc<dyn ForgeClient>,
    git: Option<LocalGit>,
}

impl ToolDispatcher {
    pub fn new(policy: Arc<SafetyPolicy>, forge: Arc<dyn ForgeClient>) -> Self {
        Self {
            policy,
            forge,
            git: None,
        }
    }

    /// Also serve the read-only `git_*` tools over `git`
    pub fn with_git(mut self, git: LocalGit) -> Self {
        self.git = Some(git);
        self
    }

    pub fn policy(&self) -> &Arc<SafetyPolicy> {
        &self.policy
    }

    pub fn tools(&self) -> Vec<ToolDefinition> {
        tools::tool_definitions(self.git.is_some())
    }

    /// Run one tool call
    ///
    /// Only a call that names no known tool, or passes arguments of the wrong
    /// shape to a git tool, is an `Err`; everything else is a tool result.
    pub async fn call(&self, name: &str, arguments: Params) -> Result<ToolCallResult, DispatchError> {
        let tool = canonical_name(name);

        if risk::is_admin(tool) {
            return Ok(self.call_admin(tool, &arguments).await);
        }

        match &self.git {
            Some(git) if is_git_tool(tool) => call_git(git, tool, &arguments).await,
            _ => Err(DispatchError::UnknownTool(name.to_string())),
        }
    }

    async fn call_admin(&self, operation: &str, params: &Params) -> ToolCallResult {
        info!(operation, "admin tool call");

        // Disabled mode skips the policy gates, but a dry run still only previews
        let dry_run = params.get("dry_run").and_then(Value::as_bool) == Some(true);
        if dry_run && self.policy.config().mode == SafetyMode::Disabled {
            return ToolCallResult::text(self.preview(operation, params).await);
        }

        let result = self
            .policy
            .guarded(operation, params, |check| self.execute(operation, params, check))
            .await;

        match result {
            Ok(Guarded::Completed { output, .. }) => {
                ToolCallResult::text(format!("✅ {} completed\n\n{}", operation, pretty(&output)))
            }
            Ok(Guarded::Denied(check)) => self.denied(operation, params, check).await,
            Err(e) => {
                warn!(operation, error = %e, "admin tool call failed");
                ToolCallResult::error(format!("❌ {} failed: {}", operation, e))
            }
        }
    }

    /// Body run once the safety layer lets the call through
    async fn execute(
        &self,
        operation: &str,
        params: &Params,
        check: SafetyCheck,
    ) -> Result<Executed<Value>, ForgeError> {
        let backup = if check.requires_backup && self.policy.config().enable_auto_backup {
            self.backup(operation, params).await
        } else {
            None
        };

        let output = self.forge.call(operation, params).await?;

        Ok(Executed::new(output)
            .with_changes(describe_changes(operation, params))
            .with_backup(backup))
    }

    /// Snapshot the remote state before a change
    ///
    /// A snapshot that cannot be fetched is reported and the change goes
    /// ahead without one.
    async fn backup(&self, operation: &str, params: &Params) -> Option<std::path::PathBuf> {
        match self.forge.snapshot(operation, params).await {
            Ok(Some(snapshot)) => self.policy.save_backup(operation, params, &snapshot),
            Ok(None) => None,
            Err(e) => {
                warn!(operation, error = %e, "snapshot failed, continuing without backup");
                None
            }
        }
    }

    async fn denied(&self, operation: &str, params: &Params, check: SafetyCheck) -> ToolCallResult {
        match check.error {
            Some(SafetyError::DryRunPreview(_)) => {
                ToolCallResult::text(self.preview(operation, params).await)
            }
            Some(SafetyError::DryRunRequired(_)) | Some(SafetyError::ConfirmationRequired { .. }) => {
                debug!(operation, "returning safety instruction");
                ToolCallResult::text(check.message)
            }
            _ => ToolCallResult::error(check.message),
        }
    }

    async fn preview(&self, operation: &str, params: &Params) -> String {
        let mut text = self.policy.preview_operation(operation, params);

        match self.forge.snapshot(operation, params).await {
            Ok(Some(Value::Null)) => text.push_str("\n\nCurrent state: not present"),
            Ok(Some(snapshot)) => {
                text.push_str("\n\nCurrent state:\n");
                text.push_str(&pretty(&snapshot));
            }
            Ok(None) => {}
            Err(e) => text.push_str(&format!("\n\nCurrent state unavailable: {}", e)),
        }

        text
    }
}

async fn call_git(
    git: &LocalGit,
    tool: &str,
    arguments: &Params,
) -> Result<ToolCallResult, DispatchError> {
    let path = optional_str(arguments, "path")?;

    let result = match tool {
        "git_status" => git.status().await.map(|report| pretty_json(&report)),
        "git_log" => {
            let limit = match arguments.get("limit") {
                None | Some(Value::Null) => DEFAULT_LOG_LIMIT,
                Some(value) => value
                    .as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        DispatchError::InvalidArgument(
                            "limit".to_string(),
                            "expected a positive integer".to_string(),
                        )
                    })?,
            };
            git.log(limit, path).await.map(|commits| pretty_json(&commits))
        }
        "git_diff" => {
            let staged = match arguments.get("staged") {
                None | Some(Value::Null) => false,
                Some(value) => value.as_bool().ok_or_else(|| {
                    DispatchError::InvalidArgument(
                        "staged".to_string(),
                        "expected a boolean".to_string(),
                    )
                })?,
            };
            git.diff(staged, path).await.map(|diff| {
                if diff.trim().is_empty() {
                    "No changes".to_string()
                } else {
                    diff
                }
            })
        }
        "git_branch_list" => git.branch_list().await.map(|branches| pretty_json(&branches)),
        "git_current_branch" => git
            .current_branch()
            .await
            .map(|branch| branch.unwrap_or_else(|| "HEAD is detached".to_string())),
        other => return Err(DispatchError::UnknownTool(other.to_string())),
    };

    Ok(match result {
        Ok(text) => ToolCallResult::text(text),
        Err(e) => git_failure(tool, e),
    })
}

fn git_failure(tool: &str, error: GitError) -> ToolCallResult {
    warn!(tool, error = %error, "git tool failed");
    ToolCallResult::error(format!("{} failed: {}", tool, error))
}

fn optional_str<'a>(arguments: &'a Params, key: &str) -> Result<Option<&'a str>, DispatchError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(DispatchError::InvalidArgument(
            key.to_string(),
            "expected a string".to_string(),
        )),
    }
}

/// Audit-facing summary of what a call changed
pub fn describe_changes(operation: &str, params: &Params) -> Vec<String> {
    let target = match (
        params.get("owner").and_then(Value::as_str),
        params.get("repo").and_then(Value::as_str),
    ) {
        (Some(owner), Some(repo)) => format!("{}/{}", owner, repo),
        _ => "account".to_string(),
    };

    let mut changes = vec![format!("{} on {}", operation, target)];
    changes.extend(
        sanitize_params(params)
            .into_iter()
            .filter(|(key, _)| {
                key != "owner" && key != "repo" && !CONTROL_KEYS.contains(&key.as_str())
            })
            .map(|(key, value)| match value {
                Value::String(s) => format!("{} = {}", key, s),
                other => format!("{} = {}", key, other),
            }),
    );
    changes
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .map(|v| pretty(&v))
        .unwrap_or_else(|e| format!("unserializable output: {}", e))
}
