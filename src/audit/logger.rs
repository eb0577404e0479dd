use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::safety::risk::RiskLevel;
use crate::safety::{Params, sanitize_params};

pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB
pub const DEFAULT_MAX_BACKUPS: usize = 5;
/// Characters of a confirmation token kept in the log
const TOKEN_KEEP_CHARS: usize = 10;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize audit entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of an audited tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failed,
    Partial,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }
}

impl std::fmt::Display for AuditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub operation: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub arguments: Params,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
    #[serde(rename = "rollback_cmd", default, skip_serializing_if = "Option::is_none")]
    pub rollback_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_token: Option<String>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        operation: &str,
        risk_level: RiskLevel,
        arguments: Params,
        result: AuditResult,
    ) -> Self {
        Self {
            timestamp: timestamp.to_rfc3339(),
            operation: operation.to_string(),
            risk_level,
            arguments,
            result,
            changes: Vec::new(),
            rollback_command: None,
            confirmation_token: None,
            execution_time_ms: 0,
            error_message: None,
        }
    }

    pub fn with_changes(mut self, changes: Vec<String>) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_rollback(mut self, command: impl Into<String>) -> Self {
        self.rollback_command = Some(command.into());
        self
    }

    pub fn with_confirmation_token(mut self, token: impl Into<String>) -> Self {
        self.confirmation_token = Some(token.into());
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Redact and trim the entry into the shape that is allowed on disk
    ///
    /// An error message is kept only on unsuccessful results, and every
    /// unsuccessful result carries one.
    pub fn sanitized(mut self) -> Self {
        self.arguments = sanitize_params(&self.arguments);
        self.confirmation_token = self.confirmation_token.map(|t| truncate_token(&t));

        match self.result {
            AuditResult::Success => self.error_message = None,
            _ => {
                if self.error_message.is_none() {
                    self.error_message = Some("unknown error".to_string());
                }
            }
        }
        self
    }
}

/// Keep the first ten characters of a token, marking the cut with `…`
pub fn truncate_token(token: &str) -> String {
    if token.chars().count() > TOKEN_KEEP_CHARS {
        let kept: String = token.chars().take(TOKEN_KEEP_CHARS).collect();
        format!("{}…", kept)
    } else {
        token.to_string()
    }
}

/// Append-only JSON-lines audit log with size-triggered rotation
///
/// All writes, rotation decisions and renames happen under one mutex, so
/// concurrent writers never interleave a rotation.
pub struct AuditLogger {
    log_path: PathBuf,
    enabled: bool,
    max_size_bytes: u64,
    max_backups: usize,
    lock: Mutex<()>,
}

impl AuditLogger {
    /// Create an AuditLogger with a custom log path
    pub fn with_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let log_path = path.as_ref().to_path_buf();

        // Ensure directory exists
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            log_path,
            enabled: true,
            max_size_bytes: DEFAULT_MAX_LOG_SIZE,
            max_backups: DEFAULT_MAX_BACKUPS,
            lock: Mutex::new(()),
        })
    }

    /// A logger that accepts every entry and writes nothing
    pub fn disabled() -> Self {
        Self {
            log_path: PathBuf::new(),
            enabled: false,
            max_size_bytes: DEFAULT_MAX_LOG_SIZE,
            max_backups: DEFAULT_MAX_BACKUPS,
            lock: Mutex::new(()),
        }
    }

    pub fn with_limits(mut self, max_size_bytes: u64, max_backups: usize) -> Self {
        self.max_size_bytes = max_size_bytes;
        self.max_backups = max_backups;
        self
    }

    /// Append one entry
    pub fn log(&self, entry: AuditEntry) -> Result<(), AuditError> {
        if !self.enabled {
            return Ok(());
        }

        let entry = entry.sanitized();
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.lock.lock();

        self.rotate_if_needed()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(line.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    /// Shift backups up by one and start a fresh file once the log is full
    ///
    /// Must be called with the logger's lock held.
    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match fs::metadata(&self.log_path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        if size < self.max_size_bytes {
            return Ok(());
        }

        if self.max_backups == 0 {
            fs::remove_file(&self.log_path)?;
            return Ok(());
        }

        let oldest = self.backup_path(self.max_backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for i in (1..self.max_backups).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                fs::rename(&from, self.backup_path(i + 1))?;
            }
        }

        fs::rename(&self.log_path, self.backup_path(1))?;
        info!(path = %self.log_path.display(), size, "audit log rotated");

        Ok(())
    }

    /// Path of the `index`-th rotated backup: `<log>.<index>`
    pub fn backup_path(&self, index: usize) -> PathBuf {
        let mut name: OsString = self.log_path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    /// Get the path to the log file
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }
}
