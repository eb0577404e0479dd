use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::safety::{Params, sanitize_params};

/// A saved copy of remote state taken before a risky change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub operation: String,
    pub timestamp: String,
    pub parameters: Params,
    pub snapshot: Value,
}

/// Writes pre-change snapshots as JSON files under one directory
pub struct BackupStore {
    dir: PathBuf,
    enabled: bool,
}

impl BackupStore {
    pub fn new<P: AsRef<Path>>(dir: P, enabled: bool) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            enabled,
        }
    }

    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `snapshot` for `operation`
    ///
    /// Returns the file written, or `None` when disabled. A failed write
    /// is logged and reported as `None`; it never blocks the operation.
    pub fn save(
        &self,
        operation: &str,
        params: &Params,
        snapshot: &Value,
        now: DateTime<Utc>,
    ) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }

        match self.write(operation, params, snapshot, now) {
            Ok(path) => {
                info!(operation, path = %path.display(), "backup written");
                Some(path)
            }
            Err(e) => {
                warn!(operation, error = %e, "failed to write backup");
                None
            }
        }
    }

    fn write(
        &self,
        operation: &str,
        params: &Params,
        snapshot: &Value,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, std::io::Error> {
        fs::create_dir_all(&self.dir)?;

        let mut suffix = [0u8; 4];
        OsRng.fill_bytes(&mut suffix);
        let name = format!(
            "{}-{}-{}.json",
            operation,
            now.format("%Y%m%dT%H%M%S%3f"),
            hex::encode(suffix)
        );
        let path = self.dir.join(name);

        let record = BackupRecord {
            operation: operation.to_string(),
            timestamp: now.to_rfc3339(),
            parameters: sanitize_params(params),
            snapshot: snapshot.clone(),
        };
        fs::write(&path, serde_json::to_string_pretty(&record)?)?;

        Ok(path)
    }

    /// Backup files, oldest first
    pub fn list(&self) -> std::io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push((entry.metadata()?.modified()?, path));
            }
        }
        files.sort();

        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    pub fn load(path: &Path) -> std::io::Result<BackupRecord> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(std::io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::REDACTED;
    use serde_json::json;
    use tempfile::TempDir;

    fn params() -> Params {
        json!({"owner": "acme", "repo": "demo", "token": "ghp_secret"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups"), true);
        let snapshot = json!({"has_wiki": true, "visibility": "private"});

        let path = store
            .save("update_repo_settings", &params(), &snapshot, Utc::now())
            .unwrap();
        assert!(path.exists());
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("update_repo_settings-")
        );

        let record = BackupStore::load(&path).unwrap();
        assert_eq!(record.operation, "update_repo_settings");
        assert_eq!(record.snapshot, snapshot);
        assert_eq!(record.parameters["token"], json!(REDACTED));
        assert_eq!(record.parameters["owner"], json!("acme"));
    }

    #[test]
    fn test_disabled_store_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups"), false);

        assert!(store.save("delete_webhook", &params(), &json!({}), Utc::now()).is_none());
        assert!(!temp_dir.path().join("backups").exists());
    }

    #[test]
    fn test_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path(), true);
        assert!(store.list().unwrap().is_empty());

        store.save("delete_webhook", &params(), &json!({"id": 1}), Utc::now());
        store.save("delete_webhook", &params(), &json!({"id": 2}), Utc::now());
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_dir_lists_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("never"), true);
        assert!(store.list().unwrap().is_empty());
    }
}
