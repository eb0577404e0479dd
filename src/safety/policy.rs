//! The policy engine.
//!
//! Every administrative call passes through [`SafetyPolicy::check_operation`]
//! before it runs and through [`SafetyPolicy::log_operation_result`] after.
//! The check validates parameters, composes the effective guard contract from
//! the safety mode and the operation's risk, then walks the dry-run and
//! confirmation gates in that order.

use arc_swap::ArcSwap;
use serde_json::Value;
use std::fmt::{self, Write as _};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditError, AuditLogger, AuditResult};
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigError;
use crate::safety::backup::BackupStore;
use crate::safety::config::{SafetyConfig, SafetyMode};
use crate::safety::error::SafetyError;
use crate::safety::risk::{self, OperationRisk, RiskLevel};
use crate::safety::rollback::rollback_command;
use crate::safety::token::{ConfirmationStore, TOKEN_TTL_MINUTES};
use crate::safety::validator::ParameterValidator;
use crate::safety::{Params, sanitize_params};

/// The safeguards one call must satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Safeguards {
    pub dry_run: bool,
    pub confirmation: bool,
    pub backup: bool,
}

impl Safeguards {
    /// Compose the contract for `risk` under `config`
    pub fn for_risk(risk: &OperationRisk, config: &SafetyConfig) -> Self {
        let level = risk.level;
        match config.mode {
            SafetyMode::Strict => Self {
                dry_run: level >= RiskLevel::Medium,
                confirmation: level >= RiskLevel::Medium,
                backup: level >= RiskLevel::High,
            },
            SafetyMode::Moderate => Self {
                dry_run: risk.requires_dry_run && level >= config.require_dry_run_above,
                confirmation: level >= config.require_confirmation_above,
                backup: risk.requires_backup,
            },
            SafetyMode::Permissive => Self {
                dry_run: false,
                confirmation: level >= RiskLevel::Critical,
                backup: level >= RiskLevel::Critical,
            },
            SafetyMode::Disabled => Self::default(),
        }
    }

    pub fn count(&self) -> usize {
        [self.dry_run, self.confirmation, self.backup]
            .iter()
            .filter(|required| **required)
            .count()
    }
}

/// Decision record for one call
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyCheck {
    pub operation: String,
    /// `None` for operations outside the administrative table
    pub risk: Option<OperationRisk>,
    pub requires_dry_run: bool,
    pub requires_confirmation: bool,
    pub requires_backup: bool,
    pub validation_errors: Vec<String>,
    pub can_proceed: bool,
    /// Exact text to hand back to the caller when the call is denied
    pub message: String,
    /// Why the call was denied
    pub error: Option<SafetyError>,
    /// Token issued by this check, if any
    pub issued_token: Option<String>,
}

impl SafetyCheck {
    fn new(operation: &str, risk: Option<OperationRisk>) -> Self {
        Self {
            operation: operation.to_string(),
            risk,
            requires_dry_run: false,
            requires_confirmation: false,
            requires_backup: false,
            validation_errors: Vec::new(),
            can_proceed: false,
            message: String::new(),
            error: None,
            issued_token: None,
        }
    }

    fn with_safeguards(mut self, safeguards: Safeguards) -> Self {
        self.requires_dry_run = safeguards.dry_run;
        self.requires_confirmation = safeguards.confirmation;
        self.requires_backup = safeguards.backup;
        self
    }

    fn allow(mut self, message: impl Into<String>) -> Self {
        self.can_proceed = true;
        self.message = message.into();
        self.error = None;
        self
    }

    fn deny(mut self, message: impl Into<String>, error: SafetyError) -> Self {
        self.can_proceed = false;
        self.message = message.into();
        self.error = Some(error);
        self
    }

    pub fn safeguards(&self) -> Safeguards {
        Safeguards {
            dry_run: self.requires_dry_run,
            confirmation: self.requires_confirmation,
            backup: self.requires_backup,
        }
    }

    /// Number of distinct safeguards this call is held to
    pub fn safeguard_count(&self) -> usize {
        self.safeguards().count()
    }

    pub fn is_admin(&self) -> bool {
        self.risk.is_some()
    }

    /// `Ok` when the call may proceed, otherwise the reason it may not
    pub fn into_result(mut self) -> Result<Self, SafetyError> {
        if self.can_proceed {
            return Ok(self);
        }
        match self.error.take() {
            Some(err) => Err(err),
            None => Err(SafetyError::Denied(self.message)),
        }
    }
}

/// What happened when an authorised call ran
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub result: AuditResult,
    pub changes: Vec<String>,
    pub rollback_command: Option<String>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn success(duration: Duration) -> Self {
        Self {
            result: AuditResult::Success,
            changes: Vec::new(),
            rollback_command: None,
            duration,
            error: None,
        }
    }

    pub fn failed(duration: Duration, error: impl Into<String>) -> Self {
        Self {
            result: AuditResult::Failed,
            error: Some(error.into()),
            ..Self::success(duration)
        }
    }

    pub fn partial(duration: Duration, error: impl Into<String>) -> Self {
        Self {
            result: AuditResult::Partial,
            error: Some(error.into()),
            ..Self::success(duration)
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
}

/// Output of an executor run under [`SafetyPolicy::guarded`]
#[derive(Debug, Clone, PartialEq)]
pub struct Executed<T> {
    pub output: T,
    pub changes: Vec<String>,
    /// Snapshot written before the change, if one was taken
    pub backup: Option<PathBuf>,
    /// Set when only part of the change was applied
    pub partial_error: Option<String>,
}

impl<T> Executed<T> {
    pub fn new(output: T) -> Self {
        Self {
            output,
            changes: Vec::new(),
            backup: None,
            partial_error: None,
        }
    }

    pub fn with_changes(mut self, changes: Vec<String>) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_backup(mut self, backup: Option<PathBuf>) -> Self {
        self.backup = backup;
        self
    }

    pub fn partial(mut self, error: impl Into<String>) -> Self {
        self.partial_error = Some(error.into());
        self
    }
}

/// Result of [`SafetyPolicy::guarded`]
#[derive(Debug)]
pub enum Guarded<T> {
    /// The check refused the call; nothing ran
    Denied(SafetyCheck),
    Completed { check: SafetyCheck, output: T },
}

/// Drives classification, validation, tokens and the audit log
pub struct SafetyPolicy {
    config: ArcSwap<SafetyConfig>,
    audit: ArcSwap<AuditLogger>,
    backups: ArcSwap<BackupStore>,
    tokens: Arc<ConfirmationStore>,
    validator: ParameterValidator,
    clock: Arc<dyn Clock>,
}

fn audit_logger_for(config: &SafetyConfig) -> std::io::Result<AuditLogger> {
    if !config.enable_audit_log {
        return Ok(AuditLogger::disabled());
    }
    Ok(AuditLogger::with_path(&config.audit_log_path)?
        .with_limits(config.audit_max_size_bytes, config.audit_max_backups))
}

fn backup_store_for(config: &SafetyConfig) -> BackupStore {
    BackupStore::new(&config.backup_path, config.enable_auto_backup)
}

impl SafetyPolicy {
    pub fn new(
        config: SafetyConfig,
        tokens: Arc<ConfirmationStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuditError> {
        let audit = audit_logger_for(&config)?;
        let backups = backup_store_for(&config);

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            audit: ArcSwap::from_pointee(audit),
            backups: ArcSwap::from_pointee(backups),
            tokens,
            validator: ParameterValidator::new(),
            clock,
        })
    }

    /// A policy on the system clock with its own token store
    ///
    /// An audit log that cannot be opened is reported and left disabled.
    pub fn from_config(config: SafetyConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tokens = Arc::new(ConfirmationStore::with_clock(Arc::clone(&clock)));

        match Self::new(config.clone(), Arc::clone(&tokens), Arc::clone(&clock)) {
            Ok(policy) => policy,
            Err(e) => {
                warn!(
                    path = %config.audit_log_path.display(),
                    error = %e,
                    "audit log unavailable, continuing without it"
                );
                Self {
                    audit: ArcSwap::from_pointee(AuditLogger::disabled()),
                    backups: ArcSwap::from_pointee(backup_store_for(&config)),
                    config: ArcSwap::from_pointee(config),
                    tokens,
                    validator: ParameterValidator::new(),
                    clock,
                }
            }
        }
    }

    /// Decide whether `operation` may run with `params`
    ///
    /// The only state this can change is the token store: it issues a token
    /// when one is needed and consumes the one presented. Both happen as the
    /// last step, so an abandoned check leaves nothing behind.
    pub fn check_operation(&self, operation: &str, params: &Params) -> SafetyCheck {
        let config = self.config.load();

        let check = match self.assess(&config, operation, params) {
            Ok(check) => check,
            Err(done) => return done,
        };
        // Admin operations always carry their risk past assessment
        let Some(risk) = check.risk else {
            return check.allow("not an administrative operation");
        };

        // A dry run is a preview in every enforcing mode, gated or not
        let dry_run = params.get("dry_run").and_then(Value::as_bool);
        if dry_run == Some(true) {
            debug!(operation, "dry-run preview");
            return check.deny(
                "dry-run mode - preview only",
                SafetyError::DryRunPreview(operation.to_string()),
            );
        }

        if check.requires_dry_run && dry_run.is_none() {
            debug!(operation, "dry-run required");
            return check.deny(
                dry_run_required_message(operation, &risk),
                SafetyError::DryRunRequired(operation.to_string()),
            );
        }

        if check.requires_confirmation {
            let presented = params
                .get("confirmation_token")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty());

            match presented {
                None => {
                    let token = self.tokens.generate(operation, params, risk.level);
                    let message = confirmation_message(operation, &risk, &token.token);
                    let mut check = check.deny(
                        message,
                        SafetyError::ConfirmationRequired {
                            token: token.token.clone(),
                        },
                    );
                    check.issued_token = Some(token.token);
                    return check;
                }
                Some(token) => {
                    if let Err(err) = self.tokens.validate(token, operation, params) {
                        warn!(operation, error = %err, "confirmation rejected");
                        return check.deny(format!("confirmation failed: {}", err), err);
                    }
                }
            }
        }

        debug!(operation, risk_level = %risk.level, "safety checks passed");
        check.allow("safety checks passed")
    }

    /// Classification, validation and contract composition
    ///
    /// `Err` carries a finished decision: disabled mode, a non-admin
    /// operation, or a validation failure.
    fn assess(
        &self,
        config: &SafetyConfig,
        operation: &str,
        params: &Params,
    ) -> Result<SafetyCheck, SafetyCheck> {
        let risk = risk::require(operation);

        if config.mode == SafetyMode::Disabled {
            return Err(SafetyCheck::new(operation, risk.ok().copied()).allow("safety checks disabled"));
        }

        let risk = match risk {
            Ok(risk) => *risk,
            Err(err) => {
                debug!(operation, reason = %err, "no safety checks apply");
                return Err(SafetyCheck::new(operation, None).allow("not an administrative operation"));
            }
        };

        let check = SafetyCheck::new(operation, Some(risk));

        if let Err(err) = self.validator.validate(operation, params) {
            warn!(operation, parameter = %err.parameter, reason = %err.reason, "parameter validation failed");
            let reason = err.to_string();
            let mut check = check.deny(
                format!("parameter validation failed: {}", reason),
                SafetyError::from(err),
            );
            check.validation_errors.push(reason);
            return Err(check);
        }

        Ok(check.with_safeguards(Safeguards::for_risk(&risk, config)))
    }

    /// Append the outcome of an authorised call to the audit log
    ///
    /// Write failures are reported and swallowed; the call already happened.
    pub fn log_operation_result(
        &self,
        operation: &str,
        risk: &OperationRisk,
        params: &Params,
        outcome: &OperationOutcome,
    ) {
        let audit = self.audit.load();
        if !self.config.load().enable_audit_log || !audit.is_enabled() {
            return;
        }

        let mut entry = AuditEntry::new(
            self.clock.now(),
            operation,
            risk.level,
            params.clone(),
            outcome.result,
        )
        .with_changes(outcome.changes.clone())
        .with_duration_ms(u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX));

        if let Some(command) = &outcome.rollback_command {
            entry = entry.with_rollback(command.clone());
        }
        if let Some(token) = params.get("confirmation_token").and_then(Value::as_str) {
            entry = entry.with_confirmation_token(token);
        }
        if let Some(error) = &outcome.error {
            entry = entry.with_error(error.clone());
        }

        if let Err(e) = audit.log(entry) {
            warn!(operation, path = %audit.log_path().display(), error = %e, "failed to write audit entry");
        }
    }

    /// Check, run `execute` if allowed, and audit what happened
    ///
    /// Executor errors are recorded as failed and returned unchanged.
    pub async fn guarded<T, E, F, Fut>(
        &self,
        operation: &str,
        params: &Params,
        execute: F,
    ) -> Result<Guarded<T>, E>
    where
        F: FnOnce(SafetyCheck) -> Fut,
        Fut: Future<Output = Result<Executed<T>, E>>,
        E: fmt::Display,
    {
        let check = self.check_operation(operation, params);
        if !check.can_proceed {
            return Ok(Guarded::Denied(check));
        }

        let Some(risk) = check.risk else {
            let executed = execute(check.clone()).await?;
            return Ok(Guarded::Completed {
                check,
                output: executed.output,
            });
        };

        let started = Instant::now();
        let result = execute(check.clone()).await;
        let elapsed = started.elapsed();

        match result {
            Ok(executed) => {
                let rollback = rollback_command(operation, params, executed.backup.as_deref());
                let outcome = match &executed.partial_error {
                    Some(error) => OperationOutcome::partial(elapsed, error.clone()),
                    None => OperationOutcome::success(elapsed),
                }
                .with_changes(executed.changes)
                .with_rollback(rollback);

                self.log_operation_result(operation, &risk, params, &outcome);
                Ok(Guarded::Completed {
                    check,
                    output: executed.output,
                })
            }
            Err(err) => {
                let outcome = OperationOutcome::failed(elapsed, err.to_string());
                self.log_operation_result(operation, &risk, params, &outcome);
                Err(err)
            }
        }
    }

    /// Describe what a call would be held to, without issuing or consuming
    /// any token
    pub fn preview_operation(&self, operation: &str, params: &Params) -> String {
        let config = self.config.load();

        let check = match self.assess(&config, operation, params) {
            Ok(check) => check,
            Err(done) => {
                return match (&done.risk, done.can_proceed) {
                    (_, true) if config.mode == SafetyMode::Disabled => {
                        format!("Safety checks are disabled; {} would run unchecked", operation)
                    }
                    (None, _) => format!(
                        "{} is not an administrative operation; no safety checks apply",
                        operation
                    ),
                    (Some(_), _) => format!("🚫 {}\n\n{}", operation, done.message),
                };
            }
        };
        let Some(risk) = check.risk else {
            return String::new();
        };

        let mut out = String::new();
        let _ = writeln!(out, "🔍 PREVIEW: {}", operation);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Risk: {} {} ({})",
            risk.level.emoji(),
            risk.level,
            risk.category
        );
        let _ = writeln!(out, "{}", risk.description);
        let _ = writeln!(out);

        let _ = writeln!(out, "Parameters:");
        let shown = sanitize_params(params);
        if shown.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for (key, value) in &shown {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = writeln!(out, "  {}: {}", key, rendered);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Safety mode: {}", config.mode);
        let _ = writeln!(out, "Requirements:");
        let _ = writeln!(out, "  dry-run: {}", required(check.requires_dry_run));
        let _ = writeln!(out, "  confirmation: {}", required(check.requires_confirmation));
        let _ = writeln!(
            out,
            "  backup: {}",
            required(check.requires_backup && config.enable_auto_backup)
        );
        let _ = writeln!(out);

        let rollback = rollback_command(operation, params, None);
        let _ = write!(out, "Rollback: {}", rollback);

        out
    }

    /// Swap in a new configuration
    ///
    /// The audit logger is rebuilt when its path, enablement or limits
    /// change. On error the previous configuration stays active.
    pub fn update_config(&self, new_config: SafetyConfig) -> Result<(), ConfigError> {
        new_config.validate()?;
        let current = self.config.load();

        let audit_changed = current.enable_audit_log != new_config.enable_audit_log
            || current.audit_log_path != new_config.audit_log_path
            || current.audit_max_size_bytes != new_config.audit_max_size_bytes
            || current.audit_max_backups != new_config.audit_max_backups;

        let audit = if audit_changed {
            let logger = audit_logger_for(&new_config).map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "audit log path {}: {}",
                    new_config.audit_log_path.display(),
                    e
                ))
            })?;
            Some(logger)
        } else {
            None
        };

        let backups_changed = current.enable_auto_backup != new_config.enable_auto_backup
            || current.backup_path != new_config.backup_path;

        info!(
            from = %current.mode,
            to = %new_config.mode,
            audit_rebound = audit_changed,
            "safety config updated"
        );

        if let Some(logger) = audit {
            self.audit.store(Arc::new(logger));
        }
        if backups_changed {
            self.backups.store(Arc::new(backup_store_for(&new_config)));
        }
        self.config.store(Arc::new(new_config));

        Ok(())
    }

    /// Write a pre-change snapshot when auto-backup is on
    pub fn save_backup(&self, operation: &str, params: &Params, snapshot: &Value) -> Option<PathBuf> {
        self.backups
            .load()
            .save(operation, params, snapshot, self.clock.now())
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<SafetyConfig> {
        self.config.load_full()
    }

    pub fn tokens(&self) -> &Arc<ConfirmationStore> {
        &self.tokens
    }

    /// Path of the active audit log, `None` when auditing is off
    pub fn audit_path(&self) -> Option<PathBuf> {
        let audit = self.audit.load();
        audit.is_enabled().then(|| audit.log_path().to_path_buf())
    }

    pub fn backup_dir(&self) -> Option<PathBuf> {
        let backups = self.backups.load();
        backups.is_enabled().then(|| backups.dir().to_path_buf())
    }
}

fn required(flag: bool) -> &'static str {
    if flag { "required" } else { "not required" }
}

fn dry_run_required_message(operation: &str, risk: &OperationRisk) -> String {
    format!(
        "dry-run required: {} is a {} risk operation.\n\n{}\n\n\
         Call again with dry_run=true to preview the change, then with dry_run=false to apply it.",
        operation, risk.level, risk.description
    )
}

/// Text handed to the agent when a confirmation token is issued
pub fn confirmation_message(operation: &str, risk: &OperationRisk, token: &str) -> String {
    format!(
        "{} {} RISK OPERATION: {}\n\n{}\n\nTo proceed, call again with:\n  confirmation_token={}\n\nToken expires in {} minutes",
        risk.level.emoji(),
        risk.level,
        operation,
        risk.description,
        token,
        TOKEN_TTL_MINUTES
    )
}
