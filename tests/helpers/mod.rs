#![allow(dead_code)]

use async_trait::async_trait;
use gitwarden::clock::{Clock, ManualClock};
use gitwarden::forge::{ForgeClient, ForgeError};
use gitwarden::safety::{ConfirmationStore, Params, SafetyConfig, SafetyMode, SafetyPolicy};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

/// Helper to create a test git repository on branch `main`
pub fn create_test_repo() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let repo_path = temp_dir.path().to_path_buf();

    Command::new("git")
        .args(["init", "-b", "main"])
        .current_dir(&repo_path)
        .output()
        .expect("Failed to init git repo");

    Command::new("git")
        .args(["config", "user.name", "Test User"])
        .current_dir(&repo_path)
        .output()
        .expect("Failed to set git user.name");

    Command::new("git")
        .args(["config", "user.email", "test@example.com"])
        .current_dir(&repo_path)
        .output()
        .expect("Failed to set git user.email");

    (temp_dir, repo_path)
}

/// Helper to create a commit
pub fn create_commit(repo_path: &Path, file: &str, content: &str, message: &str) {
    fs::write(repo_path.join(file), content).expect("Failed to write file");

    Command::new("git")
        .args(["add", file])
        .current_dir(repo_path)
        .output()
        .expect("Failed to add file");

    Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(repo_path)
        .output()
        .expect("Failed to commit");
}

pub fn params(value: Value) -> Params {
    value.as_object().cloned().expect("params must be a JSON object")
}

/// Config with audit log and backups inside `dir`
pub fn config_in(dir: &Path, mode: SafetyMode) -> SafetyConfig {
    SafetyConfig {
        mode,
        audit_log_path: dir.join("audit.log"),
        backup_path: dir.join("backups"),
        ..SafetyConfig::default()
    }
}

/// Policy on a manual clock so tests can move time
pub fn policy_in(dir: &Path, mode: SafetyMode) -> (SafetyPolicy, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let shared: Arc<dyn Clock> = clock.clone();
    let tokens = Arc::new(ConfirmationStore::with_clock(Arc::clone(&shared)));
    let policy = SafetyPolicy::new(config_in(dir, mode), tokens, shared).expect("policy");
    (policy, clock)
}

/// Pulls `CONF:xxxxxxxxxxxx` out of a confirmation message
pub fn token_from(message: &str) -> String {
    message
        .lines()
        .find_map(|line| line.trim().strip_prefix("confirmation_token="))
        .expect("message carries a token")
        .to_string()
}

/// Forge double that records every call and answers from a script
#[derive(Default)]
pub struct RecordingForge {
    pub calls: Mutex<Vec<(String, Params)>>,
    pub snapshots: Mutex<Vec<String>>,
    pub fail_with: Mutex<Option<String>>,
}

impl RecordingForge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(message: &str) -> Arc<Self> {
        let forge = Self::default();
        *forge.fail_with.lock() = Some(message.to_string());
        Arc::new(forge)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn operations(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(op, _)| op.clone()).collect()
    }
}

#[async_trait]
impl ForgeClient for RecordingForge {
    async fn call(&self, operation: &str, params: &Params) -> Result<Value, ForgeError> {
        self.calls
            .lock()
            .push((operation.to_string(), params.clone()));

        if let Some(message) = self.fail_with.lock().clone() {
            return Err(ForgeError::ApiError {
                status: 422,
                message,
            });
        }
        Ok(json!({"operation": operation, "ok": true}))
    }

    async fn snapshot(&self, operation: &str, _params: &Params) -> Result<Option<Value>, ForgeError> {
        self.snapshots.lock().push(operation.to_string());
        Ok(Some(json!({"operation": operation, "state": "before"})))
    }
}
