mod helpers;

use chrono::Utc;
use gitwarden::audit::{self, AuditEntry, AuditLogger, AuditResult};
use gitwarden::safety::{
    Executed, Guarded, MismatchKind, RiskLevel, SafetyError, SafetyMode, sanitize_params,
};
use helpers::{params, policy_in, token_from};
use serde_json::json;
use std::fs;
use tempfile::TempDir;

/// LOW read in moderate mode runs straight through and is audited
#[tokio::test]
async fn test_low_read_moderate_mode() {
    let temp = TempDir::new().unwrap();
    let (policy, _clock) = policy_in(temp.path(), SafetyMode::Moderate);
    let p = params(json!({"owner": "acme", "repo": "demo"}));

    let check = policy.check_operation("get_repo_settings", &p);
    assert!(check.can_proceed);
    assert!(check.issued_token.is_none());
    assert!(!check.requires_dry_run);
    assert_eq!(policy.tokens().active_count(), 0);

    let outcome = policy
        .guarded("get_repo_settings", &p, |_| async {
            Ok::<_, String>(Executed::new(json!({"name": "demo"})))
        })
        .await
        .unwrap();
    assert!(matches!(outcome, Guarded::Completed { .. }));

    let entries = audit::read_all(&temp.path().join("audit.log")).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, "get_repo_settings");
    assert_eq!(entries[0].risk_level, RiskLevel::Low);
    assert_eq!(entries[0].result, AuditResult::Success);
}

/// MEDIUM write without dry_run is asked for one, then allowed
#[test]
fn test_medium_write_missing_dry_run() {
    let temp = TempDir::new().unwrap();
    let (policy, _clock) = policy_in(temp.path(), SafetyMode::Moderate);
    let mut p = params(json!({
        "owner": "acme",
        "repo": "demo",
        "username": "alice",
        "permission": "push"
    }));

    let check = policy.check_operation("add_collaborator", &p);
    assert!(!check.can_proceed);
    assert!(check.message.contains("dry-run required"));
    assert!(matches!(check.error, Some(SafetyError::DryRunRequired(_))));

    p.insert("dry_run".to_string(), json!(false));
    let check = policy.check_operation("add_collaborator", &p);
    assert!(check.can_proceed, "{}", check.message);
    assert!(!check.requires_confirmation);
    assert!(check.issued_token.is_none());
}

/// HIGH destructive call goes through the two-call handshake
#[test]
fn test_high_destructive_handshake() {
    let temp = TempDir::new().unwrap();
    let (policy, _clock) = policy_in(temp.path(), SafetyMode::Moderate);
    let mut p = params(json!({"owner": "acme", "repo": "demo", "hook_id": 123, "dry_run": false}));

    let first = policy.check_operation("delete_webhook", &p);
    assert!(!first.can_proceed);
    let token = token_from(&first.message);
    assert_eq!(token.len(), 17);
    assert!(token.starts_with("CONF:"));
    assert!(token[5..].chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    assert_eq!(first.issued_token.as_deref(), Some(token.as_str()));

    p.insert("confirmation_token".to_string(), json!(token));
    let second = policy.check_operation("delete_webhook", &p);
    assert!(second.can_proceed, "{}", second.message);

    let third = policy.check_operation("delete_webhook", &p);
    assert!(!third.can_proceed);
    assert!(third.message.contains("already been used") || third.message.contains("invalid"));
}

/// Tokens are bound to the critical keys they were issued for
#[test]
fn test_token_parameter_binding() {
    let temp = TempDir::new().unwrap();
    let (policy, _clock) = policy_in(temp.path(), SafetyMode::Moderate);
    let store = policy.tokens();
    let issued = params(json!({"owner": "acme", "repo": "demo", "hook_id": 123}));

    let token = store.generate("delete_webhook", &issued, RiskLevel::High);

    let evil = params(json!({"owner": "evil", "repo": "demo", "hook_id": 123}));
    assert_eq!(
        store.validate(&token.token, "delete_webhook", &evil),
        Err(SafetyError::ConfirmationMismatch(MismatchKind::Parameter(
            "owner".to_string()
        )))
    );

    let with_extra = params(json!({"owner": "acme", "repo": "demo", "hook_id": 123, "dry_run": false}));
    assert_eq!(store.validate(&token.token, "delete_webhook", &with_extra), Ok(()));
}

/// Traversal in a name is rejected before any safeguard is composed
#[test]
fn test_path_traversal_rejection() {
    let temp = TempDir::new().unwrap();
    let (policy, _clock) = policy_in(temp.path(), SafetyMode::Moderate);
    let p = params(json!({
        "owner": "../etc",
        "repo": "demo",
        "username": "alice",
        "permission": "push"
    }));

    let check = policy.check_operation("add_collaborator", &p);
    assert!(!check.can_proceed);
    assert!(check.message.contains("path traversal"), "{}", check.message);
    assert_eq!(check.validation_errors.len(), 1);
    assert!(matches!(
        check.error,
        Some(SafetyError::ParameterValidation { ref parameter, .. }) if parameter == "owner"
    ));
    assert_eq!(policy.tokens().active_count(), 0);
}

/// Small size limit rotates into numbered backups, capped at max_backups
#[test]
fn test_audit_rotation() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("audit.log");
    let logger = AuditLogger::with_path(&path).unwrap().with_limits(100, 5);

    for i in 0..20 {
        let args = sanitize_params(&params(json!({"owner": "acme", "repo": format!("r{}", i)})));
        let entry = AuditEntry::new(
            Utc::now(),
            "update_webhook",
            RiskLevel::Medium,
            args,
            AuditResult::Success,
        );
        logger.log(entry).unwrap();
    }

    assert!(fs::metadata(&path).unwrap().len() > 0);
    assert!(fs::metadata(logger.backup_path(1)).unwrap().len() > 0);
    assert!(!logger.backup_path(6).exists());
}
