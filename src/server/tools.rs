//! Tool catalog served by tools/list.

use serde_json::{Map, Value, json};

use crate::safety::risk::{self, OperationRisk};
use crate::safety::validator::{CONTENT_TYPES, PERMISSIONS, VISIBILITIES};
use crate::server::protocol::ToolDefinition;

/// Host prefixes stripped from tool names before dispatch
pub const TOOL_PREFIXES: &[&str] = &["github_", "admin_"];

pub const GIT_TOOLS: &[&str] = &[
    "git_status",
    "git_log",
    "git_diff",
    "git_branch_list",
    "git_current_branch",
];

/// Canonical tool name: `github_delete_webhook` becomes `delete_webhook`
///
/// Only admin operations are unprefixed, so a local `git_*` tool keeps its
/// name.
pub fn canonical_name(name: &str) -> &str {
    for prefix in TOOL_PREFIXES {
        if let Some(stripped) = name.strip_prefix(prefix) {
            if risk::is_admin(stripped) {
                return stripped;
            }
        }
    }
    name
}

pub fn is_git_tool(name: &str) -> bool {
    GIT_TOOLS.contains(&name)
}

/// Required keys for each admin operation beyond none
fn required_keys(operation: &str) -> &'static [&'static str] {
    match operation {
        "accept_invitation" => &["invitation_id"],
        "get_branch_protection" | "update_branch_protection" | "delete_branch_protection" => {
            &["owner", "repo", "branch"]
        }
        "create_webhook" => &["owner", "repo", "url"],
        "update_webhook" | "delete_webhook" | "test_webhook" => &["owner", "repo", "hook_id"],
        "check_collaborator" | "add_collaborator" | "remove_collaborator" => {
            &["owner", "repo", "username"]
        }
        "update_collaborator_permission" => &["owner", "repo", "username", "permission"],
        "cancel_invitation" => &["owner", "repo", "invitation_id"],
        "add_repo_team" => &["owner", "repo", "team_id"],
        _ => &["owner", "repo"],
    }
}

/// Optional keys accepted on top of the required ones
fn optional_keys(operation: &str) -> &'static [&'static str] {
    match operation {
        "update_repo_settings" => &[
            "description",
            "homepage",
            "visibility",
            "default_branch",
            "has_issues",
            "has_wiki",
            "has_projects",
            "delete_branch_on_merge",
        ],
        "update_branch_protection" => &["required_approving_review_count", "enforce_admins"],
        "create_webhook" => &["content_type", "events", "secret", "active"],
        "update_webhook" => &["url", "content_type", "events", "secret", "active"],
        "add_collaborator" | "add_repo_team" => &["permission"],
        _ => &[],
    }
}

fn property(key: &str) -> Value {
    match key {
        "owner" => json!({"type": "string", "description": "Repository owner (user or organisation)"}),
        "repo" => json!({"type": "string", "description": "Repository name"}),
        "username" => json!({"type": "string", "description": "Account login"}),
        "branch" => json!({"type": "string", "description": "Branch name"}),
        "permission" => json!({"type": "string", "enum": PERMISSIONS}),
        "url" => json!({"type": "string", "description": "Webhook payload URL (http or https)"}),
        "content_type" => json!({"type": "string", "enum": CONTENT_TYPES}),
        "events" => json!({
            "type": ["string", "array"],
            "items": {"type": "string"},
            "description": "Event name or list of event names; \"*\" for all"
        }),
        "visibility" => json!({"type": "string", "enum": VISIBILITIES}),
        "hook_id" | "invitation_id" | "team_id" => json!({"type": "integer", "minimum": 1}),
        "required_approving_review_count" => {
            json!({"type": "integer", "minimum": 1, "maximum": 6})
        }
        "enforce_admins" | "has_issues" | "has_wiki" | "has_projects" | "active"
        | "delete_branch_on_merge" => json!({"type": "boolean"}),
        "dry_run" => json!({
            "type": "boolean",
            "description": "true to preview the change, false to apply it"
        }),
        "confirmation_token" => json!({
            "type": "string",
            "description": "Token returned by a previous call that asked for confirmation"
        }),
        _ => json!({"type": "string"}),
    }
}

fn object_schema(required: &[&str], optional: &[&str]) -> Value {
    let properties: Map<String, Value> = required
        .iter()
        .chain(optional)
        .map(|key| (key.to_string(), property(key)))
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn admin_tool(operation: &str, risk: &OperationRisk) -> ToolDefinition {
    let mut optional: Vec<&str> = optional_keys(operation).to_vec();
    optional.extend(["dry_run", "confirmation_token"]);

    ToolDefinition {
        name: operation.to_string(),
        description: format!("[{} risk] {}", risk.level, risk.description),
        input_schema: object_schema(required_keys(operation), &optional),
    }
}

fn git_tool(name: &str) -> ToolDefinition {
    let (description, optional): (&str, &[&str]) = match name {
        "git_status" => ("Working tree status of the local repository", &[]),
        "git_log" => ("Recent commits of the local repository", &["limit", "path"]),
        "git_diff" => ("Unstaged (or staged) changes in the local repository", &["staged", "path"]),
        "git_branch_list" => ("Local branches", &[]),
        _ => ("Currently checked-out branch", &[]),
    };

    let properties: Map<String, Value> = optional
        .iter()
        .map(|key| {
            let schema = match *key {
                "limit" => json!({"type": "integer", "minimum": 1, "maximum": 200}),
                "staged" => json!({"type": "boolean"}),
                _ => json!({"type": "string", "description": "Path relative to the repository root"}),
            };
            (key.to_string(), schema)
        })
        .collect();

    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({"type": "object", "properties": properties}),
    }
}

/// Every tool this server offers; admin tools first, in table order
pub fn tool_definitions(include_git: bool) -> Vec<ToolDefinition> {
    let mut tools: Vec<ToolDefinition> = risk::admin_operations()
        .filter_map(|op| risk::classify(op).map(|risk| admin_tool(op, risk)))
        .collect();

    if include_git {
        tools.extend(GIT_TOOLS.iter().map(|name| git_tool(name)));
    }

    tools
}
