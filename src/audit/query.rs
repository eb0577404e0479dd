//! Read-side helpers over the current audit log file.
//!
//! Rotated backups are not consulted. Lines that fail to parse are skipped.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

use crate::audit::logger::{AuditEntry, AuditResult};
use crate::safety::risk::RiskLevel;

/// Aggregate counts over an audit log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStatistics {
    pub total_entries: usize,
    pub by_risk_level: BTreeMap<String, usize>,
    pub by_result: BTreeMap<String, usize>,
    pub by_operation: BTreeMap<String, usize>,
}

/// Every parseable entry, oldest first
///
/// A missing file reads as empty.
pub fn read_all(path: &Path) -> std::io::Result<Vec<AuditEntry>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => debug!(line = number + 1, error = %e, "skipping malformed audit line"),
        }
    }

    Ok(entries)
}

/// The last `n` entries, in chronological order
pub fn recent(path: &Path, n: usize) -> std::io::Result<Vec<AuditEntry>> {
    let mut entries = read_all(path)?;
    let skip = entries.len().saturating_sub(n);
    Ok(entries.split_off(skip))
}

pub fn filter_by_operation(path: &Path, operation: &str) -> std::io::Result<Vec<AuditEntry>> {
    filter(path, |e| e.operation == operation)
}

pub fn filter_by_risk_level(path: &Path, level: RiskLevel) -> std::io::Result<Vec<AuditEntry>> {
    filter(path, |e| e.risk_level == level)
}

pub fn filter_by_result(path: &Path, result: AuditResult) -> std::io::Result<Vec<AuditEntry>> {
    filter(path, |e| e.result == result)
}

fn filter<F>(path: &Path, keep: F) -> std::io::Result<Vec<AuditEntry>>
where
    F: Fn(&AuditEntry) -> bool,
{
    Ok(read_all(path)?.into_iter().filter(|e| keep(e)).collect())
}

pub fn statistics(path: &Path) -> std::io::Result<AuditStatistics> {
    let entries = read_all(path)?;
    let mut stats = AuditStatistics {
        total_entries: entries.len(),
        ..Default::default()
    };

    for entry in &entries {
        *stats
            .by_risk_level
            .entry(entry.risk_level.to_string())
            .or_default() += 1;
        *stats.by_result.entry(entry.result.to_string()).or_default() += 1;
        *stats.by_operation.entry(entry.operation.clone()).or_default() += 1;
    }

    Ok(stats)
}

/// Delete `*.log` files in `dir` last modified more than `days_to_keep` days ago
///
/// Returns how many files were removed.
pub fn cleanup_old(dir: &Path, days_to_keep: u32) -> std::io::Result<usize> {
    let cutoff: SystemTime = (Utc::now() - Duration::days(i64::from(days_to_keep))).into();
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        if modified < cutoff {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "removed old audit log");
            removed += 1;
        }
    }

    Ok(removed)
}
