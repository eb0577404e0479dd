use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

use crate::safety::Params;

/// A single parameter failed validation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{parameter}: {reason}")]
pub struct ValidationError {
    pub parameter: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Re-attribute the error to a named parameter
    pub fn for_parameter(mut self, parameter: &str) -> Self {
        self.parameter = parameter.to_string();
        self
    }
}

/// Characters that change meaning once a value reaches a command line
pub const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '`', '$', '(', ')', '\n', '\r'];

pub const PERMISSIONS: &[&str] = &["pull", "triage", "push", "maintain", "admin"];
pub const CONTENT_TYPES: &[&str] = &["json", "form"];
pub const VISIBILITIES: &[&str] = &["public", "private", "internal"];

/// Webhook events a hook may subscribe to
pub const WEBHOOK_EVENTS: &[&str] = &[
    "*",
    "branch_protection_rule",
    "check_run",
    "check_suite",
    "code_scanning_alert",
    "commit_comment",
    "create",
    "delete",
    "dependabot_alert",
    "deploy_key",
    "deployment",
    "deployment_status",
    "discussion",
    "discussion_comment",
    "fork",
    "gollum",
    "issue_comment",
    "issues",
    "label",
    "member",
    "merge_group",
    "meta",
    "milestone",
    "package",
    "page_build",
    "ping",
    "project",
    "project_card",
    "project_column",
    "public",
    "pull_request",
    "pull_request_review",
    "pull_request_review_comment",
    "pull_request_review_thread",
    "push",
    "registry_package",
    "release",
    "repository",
    "repository_dispatch",
    "repository_vulnerability_alert",
    "secret_scanning_alert",
    "security_advisory",
    "star",
    "status",
    "team_add",
    "watch",
    "workflow_dispatch",
    "workflow_job",
    "workflow_run",
];

const MAX_BRANCH_LEN: usize = 255;
const MAX_URL_LEN: usize = 2000;
const MAX_EVENTS: usize = 50;
const SSRF_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0"];
const TRAVERSAL_PATTERNS: &[&str] = &[
    "../", "..\\", "..%2f", "..%5c", "//", "\\\\", "%2e%2e", "%252e%252e",
];

/// Keys every administrative operation understands
const COMMON_KEYS: &[&str] = &["owner", "repo", "dry_run", "confirmation_token"];

/// Operation-specific keys, on top of [`COMMON_KEYS`]
fn operation_keys(operation: &str) -> &'static [&'static str] {
    match operation {
        "update_repo_settings" => &["visibility", "has_issues", "has_wiki", "has_projects"],
        "get_branch_protection" | "delete_branch_protection" => &["branch"],
        "update_branch_protection" => &[
            "branch",
            "required_approving_review_count",
            "enforce_admins",
        ],
        "create_webhook" => &["url", "content_type", "events"],
        "update_webhook" => &["hook_id", "url", "content_type", "events"],
        "delete_webhook" | "test_webhook" => &["hook_id"],
        "check_collaborator" | "remove_collaborator" => &["username"],
        "add_collaborator" | "update_collaborator_permission" => &["username", "permission"],
        "accept_invitation" | "cancel_invitation" => &["invitation_id"],
        "add_repo_team" => &["team_id", "permission"],
        _ => &[],
    }
}

/// Validates the parameters of administrative operations
///
/// Only keys the operation recognises are checked, and only when present.
/// Whether a key is required is the tool schema's business.
pub struct ParameterValidator {
    name_pattern: Regex,
    username_pattern: Regex,
    webhook_events: HashSet<&'static str>,
}

impl ParameterValidator {
    pub fn new() -> Self {
        Self {
            name_pattern: Regex::new(r"^[A-Za-z0-9_-]{1,100}$").expect("valid owner/repo regex"),
            username_pattern: Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,38}$")
                .expect("valid username regex"),
            webhook_events: WEBHOOK_EVENTS.iter().copied().collect(),
        }
    }

    /// Validate every recognised key of `operation` present in `params`
    ///
    /// Stops at the first failure.
    pub fn validate(&self, operation: &str, params: &Params) -> Result<(), ValidationError> {
        let keys = COMMON_KEYS.iter().chain(operation_keys(operation).iter());

        for key in keys {
            if let Some(value) = params.get(*key) {
                self.validate_key(key, value)?;
            }
        }

        Ok(())
    }

    /// Validate one value under the rules for `key`
    ///
    /// Keys without a rule pass untouched.
    pub fn validate_key(&self, key: &str, value: &Value) -> Result<(), ValidationError> {
        match key {
            "owner" | "repo" => self.validate_name(key, as_str(key, value)?),
            "username" => self.validate_username(as_str(key, value)?),
            "branch" => validate_branch(as_str(key, value)?),
            "permission" => one_of(key, as_str(key, value)?, PERMISSIONS),
            "url" => validate_url(as_str(key, value)?),
            "content_type" => one_of(key, as_str(key, value)?, CONTENT_TYPES),
            "visibility" => one_of(key, as_str(key, value)?, VISIBILITIES),
            "events" => self.validate_events(value),
            "hook_id" | "invitation_id" | "team_id" => positive_id(key, value).map(|_| ()),
            "required_approving_review_count" => {
                let count = positive_id(key, value)?;
                if !(1..=6).contains(&count) {
                    return Err(ValidationError::new(key, "must be between 1 and 6"));
                }
                Ok(())
            }
            "enforce_admins" | "has_issues" | "has_wiki" | "has_projects" | "dry_run" => {
                as_bool(key, value).map(|_| ())
            }
            "confirmation_token" => as_str(key, value).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Owner and repository names
    pub fn validate_name(&self, key: &str, name: &str) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::new(key, "must not be empty"));
        }

        if name.contains("..") || name.contains('/') || name.contains('\\') {
            return Err(ValidationError::new(key, "path traversal detected"));
        }

        if !self.name_pattern.is_match(name) {
            return Err(ValidationError::new(
                key,
                "must be 1-100 characters of letters, digits, '_' or '-'",
            ));
        }

        Ok(())
    }

    pub fn validate_username(&self, username: &str) -> Result<(), ValidationError> {
        if username.is_empty() {
            return Err(ValidationError::new("username", "must not be empty"));
        }

        if !self.username_pattern.is_match(username) {
            return Err(ValidationError::new(
                "username",
                "must start with a letter or digit and contain at most 39 letters, digits or '-'",
            ));
        }

        Ok(())
    }

    pub fn validate_events(&self, value: &Value) -> Result<(), ValidationError> {
        let events: Vec<&str> = match value {
            Value::String(event) => vec![event.as_str()],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| ValidationError::new("events", "every event must be a string"))
                })
                .collect::<Result<_, _>>()?,
            _ => {
                return Err(ValidationError::new(
                    "events",
                    "must be a string or a list of strings",
                ));
            }
        };

        if events.is_empty() {
            return Err(ValidationError::new("events", "must not be empty"));
        }

        if events.len() > MAX_EVENTS {
            return Err(ValidationError::new(
                "events",
                format!("at most {} events allowed", MAX_EVENTS),
            ));
        }

        for event in events {
            if !self.webhook_events.contains(event) {
                return Err(ValidationError::new(
                    "events",
                    format!("unknown webhook event '{}'", event),
                ));
            }
        }

        Ok(())
    }
}

impl Default for ParameterValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Branch names must be usable as a git ref and harmless on a command line
pub fn validate_branch(branch: &str) -> Result<(), ValidationError> {
    if branch.is_empty() {
        return Err(ValidationError::new("branch", "must not be empty"));
    }

    if branch.len() > MAX_BRANCH_LEN {
        return Err(ValidationError::new(
            "branch",
            format!("must be at most {} characters", MAX_BRANCH_LEN),
        ));
    }

    validate_safe_input(branch).map_err(|e| e.for_parameter("branch"))?;

    if branch.starts_with('-') {
        return Err(ValidationError::new("branch", "must not start with '-'"));
    }

    if branch.ends_with(".lock") {
        return Err(ValidationError::new("branch", "must not end with '.lock'"));
    }

    Ok(())
}

/// Webhook target URLs: http(s) only, never pointing back at this host
pub fn validate_url(url: &str) -> Result<(), ValidationError> {
    if url.len() > MAX_URL_LEN {
        return Err(ValidationError::new(
            "url",
            format!("must be at most {} characters", MAX_URL_LEN),
        ));
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ValidationError::new(
            "url",
            "must start with http:// or https://",
        ));
    }

    let lower = url.to_lowercase();
    for host in SSRF_HOSTS {
        if lower.contains(host) {
            return Err(ValidationError::new(
                "url",
                format!("local address '{}' not allowed", host),
            ));
        }
    }

    Ok(())
}

/// Reject relative traversal, doubled separators and absolute paths
pub fn validate_safe_path(path: &str) -> Result<(), ValidationError> {
    let lower = path.to_lowercase();

    for pattern in TRAVERSAL_PATTERNS {
        if lower.contains(pattern) {
            return Err(ValidationError::new(
                "path",
                format!("path traversal detected ('{}')", pattern),
            ));
        }
    }

    if path.starts_with('/') || is_windows_absolute(path) {
        return Err(ValidationError::new("path", "absolute paths are not allowed"));
    }

    Ok(())
}

/// Reject values carrying shell metacharacters
pub fn validate_safe_input(input: &str) -> Result<(), ValidationError> {
    if let Some(c) = input.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(ValidationError::new(
            "input",
            format!("contains shell metacharacter {:?}", c),
        ));
    }

    Ok(())
}

fn is_windows_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\'
}

fn as_str<'a>(key: &str, value: &'a Value) -> Result<&'a str, ValidationError> {
    value
        .as_str()
        .ok_or_else(|| ValidationError::new(key, "must be a string"))
}

fn as_bool(key: &str, value: &Value) -> Result<bool, ValidationError> {
    value
        .as_bool()
        .ok_or_else(|| ValidationError::new(key, "must be a boolean"))
}

fn one_of(key: &str, value: &str, allowed: &[&str]) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            key,
            format!("must be one of: {}", allowed.join(", ")),
        ))
    }
}

/// Positive integer, accepting floats only when they hold a whole number
fn positive_id(key: &str, value: &Value) -> Result<u64, ValidationError> {
    let not_positive = || ValidationError::new(key, "must be a positive integer");

    let Value::Number(number) = value else {
        return Err(not_positive());
    };

    if let Some(id) = number.as_u64() {
        return if id > 0 { Ok(id) } else { Err(not_positive()) };
    }

    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= 1.0 && f <= u64::MAX as f64 => Ok(f as u64),
        _ => Err(not_positive()),
    }
}
