//! Risk governance for administrative forge operations.
//!
//! Classification ([`risk`]), parameter validation ([`validator`]),
//! single-use confirmation tokens ([`token`]) and the policy engine
//! ([`policy`]) that composes them under the configured [`SafetyMode`].

pub mod backup;
pub mod config;
pub mod error;
pub mod policy;
pub mod risk;
pub mod rollback;
pub mod token;
pub mod validator;

use serde_json::Value;
use std::sync::OnceLock;
use tracing::warn;

pub use backup::{BackupRecord, BackupStore};
pub use config::{SafetyConfig, SafetyMode};
pub use error::{MismatchKind, SafetyError};
pub use policy::{
    Executed, Guarded, OperationOutcome, SafetyCheck, SafetyPolicy, Safeguards,
    confirmation_message,
};
pub use risk::{OperationRisk, RiskLevel};
pub use rollback::{NO_ROLLBACK, rollback_command};
pub use token::{ConfirmationStore, ConfirmationToken};
pub use validator::{ParameterValidator, ValidationError, validate_safe_input, validate_safe_path};

/// Tool-call parameters as received on the wire
pub type Params = serde_json::Map<String, Value>;

pub const REDACTED: &str = "[REDACTED]";

/// Keys a confirmation token is bound to
pub const CRITICAL_PARAMS: &[&str] = &["owner", "repo", "username", "hook_id", "branch"];

/// Keys whose values never leave the process unredacted
pub const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "password",
    "secret",
    "api_key",
    "private_key",
    "confirmation_token",
];

pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.contains(&key)
}

/// Copy of `params` with every sensitive value replaced by `[REDACTED]`,
/// including inside nested objects and arrays
pub fn sanitize_params(params: &Params) -> Params {
    params
        .iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(key) {
                Value::String(REDACTED.to_string())
            } else {
                sanitize_value(value)
            };
            (key.clone(), value)
        })
        .collect()
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_params(map)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

static DEFAULT_POLICY: OnceLock<SafetyPolicy> = OnceLock::new();

/// Process-wide policy built from the default safety config location
///
/// Prefer constructing a [`SafetyPolicy`] and passing it around; this is
/// for callers that have no place to keep one.
pub fn default_policy() -> &'static SafetyPolicy {
    DEFAULT_POLICY.get_or_init(|| {
        let path = SafetyConfig::default_path();
        let config = SafetyConfig::load_or_default(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid safety config, using defaults");
            SafetyConfig::default()
        });
        SafetyPolicy::from_config(config)
    })
}
