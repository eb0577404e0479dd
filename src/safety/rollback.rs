use serde_json::Value;
use std::path::Path;

use crate::safety::{Params, is_sensitive_key};

pub const NO_ROLLBACK: &str = "# No automatic rollback available";

/// Operation that undoes `operation`, when there is a direct one
fn inverse(operation: &str) -> Option<&'static str> {
    match operation {
        "add_collaborator" => Some("remove_collaborator"),
        "remove_collaborator" => Some("add_collaborator"),
        "create_webhook" => Some("delete_webhook"),
        "delete_webhook" => Some("create_webhook"),
        _ => None,
    }
}

/// Suggest the command that would undo `operation`
///
/// Settings updates can only be undone from a saved backup, so they name
/// the backup file; without one there is nothing honest to suggest.
pub fn rollback_command(operation: &str, params: &Params, backup: Option<&Path>) -> String {
    if operation == "update_repo_settings" {
        return match backup {
            Some(path) => format!(
                "{} --restore_from={}",
                with_arguments(operation, params),
                path.display()
            ),
            None => NO_ROLLBACK.to_string(),
        };
    }

    match inverse(operation) {
        Some(undo) => with_arguments(undo, params),
        None => NO_ROLLBACK.to_string(),
    }
}

fn with_arguments(operation: &str, params: &Params) -> String {
    let mut command = operation.to_string();

    for (key, value) in params {
        if key == "dry_run" || key == "confirmation_token" || is_sensitive_key(key) {
            continue;
        }
        command.push_str(&format!(" --{}={}", key, render(value)));
    }

    command
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
