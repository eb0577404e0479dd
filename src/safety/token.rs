//! Single-use confirmation tokens.
//!
//! A token is issued when a risky call arrives without one and must be
//! presented on the retry. It is bound to the operation name and to the
//! critical parameters (`owner`, `repo`, `username`, `hook_id`, `branch`),
//! expires after five minutes and is removed from the store the moment it
//! validates.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::safety::error::{MismatchKind, SafetyError};
use crate::safety::risk::RiskLevel;
use crate::safety::{CRITICAL_PARAMS, Params, sanitize_params};

pub const TOKEN_PREFIX: &str = "CONF:";
/// Hex characters of the digest kept in the token
pub const TOKEN_HEX_LEN: usize = 12;
pub const TOKEN_TTL_MINUTES: i64 = 5;
/// Delay past expiry before the background sweep reclaims a token
const SWEEP_GRACE_MINUTES: i64 = 1;

/// A short-lived capability for one risky call
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationToken {
    pub token: String,
    pub operation: String,
    /// Sanitised snapshot of the parameters at issue time
    pub parameters: Params,
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl ConfirmationToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

type TokenMap = HashMap<String, ConfirmationToken>;

/// Thread-safe in-memory token store
///
/// One mutex covers issue, validation, sweeping and counting.
pub struct ConfirmationStore {
    tokens: Arc<Mutex<TokenMap>>,
    clock: Arc<dyn Clock>,
}

impl ConfirmationStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Issue a fresh token for `operation` called with `params`
    pub fn generate(&self, operation: &str, params: &Params, risk_level: RiskLevel) -> ConfirmationToken {
        let created_at = self.clock.now();
        let expires_at = created_at + Duration::minutes(TOKEN_TTL_MINUTES);
        let parameters = sanitize_params(params);

        let record = {
            let mut tokens = self.tokens.lock();

            // A prefix collision just means another draw
            let token = loop {
                let candidate = token_string(operation, params, created_at);
                if !tokens.contains_key(&candidate) {
                    break candidate;
                }
                debug!(operation, "confirmation token collision, drawing again");
            };

            let record = ConfirmationToken {
                token: token.clone(),
                operation: operation.to_string(),
                parameters,
                risk_level,
                created_at,
                expires_at,
                used: false,
            };
            tokens.insert(token, record.clone());
            record
        };

        info!(
            operation,
            risk_level = %risk_level,
            expires_at = %record.expires_at.to_rfc3339(),
            "confirmation token issued"
        );

        self.schedule_cleanup(&record);
        record
    }

    /// Check `token` against a retried call and consume it on success
    pub fn validate(&self, token: &str, operation: &str, params: &Params) -> Result<(), SafetyError> {
        let now = self.clock.now();
        let mut tokens = self.tokens.lock();

        let record = tokens.get(token).ok_or(SafetyError::ConfirmationInvalid)?;

        if record.is_expired_at(now) {
            tokens.remove(token);
            debug!(operation, "confirmation token expired");
            return Err(SafetyError::ConfirmationExpired);
        }

        if record.used {
            return Err(SafetyError::ConfirmationUsed);
        }

        if record.operation != operation {
            return Err(SafetyError::ConfirmationMismatch(MismatchKind::Operation {
                expected: record.operation.clone(),
                actual: operation.to_string(),
            }));
        }

        for key in CRITICAL_PARAMS {
            if let (Some(bound), Some(given)) = (record.parameters.get(*key), params.get(*key)) {
                if !same_binding(bound, given) {
                    return Err(SafetyError::ConfirmationMismatch(MismatchKind::Parameter(
                        key.to_string(),
                    )));
                }
            }
        }

        if let Some(record) = tokens.get_mut(token) {
            record.used = true;
        }
        tokens.remove(token);
        drop(tokens);

        info!(operation, "confirmation token consumed");
        Ok(())
    }

    /// Look at a token without consuming it
    pub fn peek(&self, token: &str) -> Option<ConfirmationToken> {
        self.tokens.lock().get(token).cloned()
    }

    /// Drop every expired token, returning how many were removed
    pub fn cleanup_all_expired(&self) -> usize {
        let now = self.clock.now();
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, record| now <= record.expires_at);
        before - tokens.len()
    }

    pub fn active_count(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn clear_all(&self) {
        self.tokens.lock().clear();
    }

    /// Reclaim the token shortly after it expires
    ///
    /// Best effort: only runs inside a tokio runtime. Expired tokens never
    /// validate whether or not this fires.
    fn schedule_cleanup(&self, record: &ConfirmationToken) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let wake_at = record.expires_at + Duration::minutes(SWEEP_GRACE_MINUTES);
        let delay = (wake_at - self.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let tokens: Weak<Mutex<TokenMap>> = Arc::downgrade(&self.tokens);
        let clock = Arc::clone(&self.clock);
        let token = record.token.clone();

        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(tokens) = tokens.upgrade() else {
                return;
            };
            let now = clock.now();
            let mut tokens = tokens.lock();
            if tokens.get(&token).is_some_and(|r| now > r.expires_at) {
                tokens.remove(&token);
                debug!("expired confirmation token reclaimed");
            }
        });
    }
}

impl Default for ConfirmationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// `CONF:` + the first 12 hex chars of
/// `sha256(op | params | time | random)`
fn token_string(operation: &str, params: &Params, now: DateTime<Utc>) -> String {
    let mut random = [0u8; 16];
    OsRng.fill_bytes(&mut random);

    let repr = serde_json::to_string(params).unwrap_or_default();
    let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());

    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b"|");
    hasher.update(repr.as_bytes());
    hasher.update(b"|");
    hasher.update(nanos.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(hex::encode(random).as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{}{}", TOKEN_PREFIX, &digest[..TOKEN_HEX_LEN])
}

/// Whether `s` has the shape of a confirmation token
pub fn is_token_format(s: &str) -> bool {
    s.strip_prefix(TOKEN_PREFIX).is_some_and(|digits| {
        digits.len() == TOKEN_HEX_LEN
            && digits
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    })
}

/// Bound and presented values agree; ids compare by whole-number value
fn same_binding(bound: &Value, given: &Value) -> bool {
    match (whole_number(bound), whole_number(given)) {
        (Some(a), Some(b)) => a == b,
        _ => bound == given,
    }
}

fn whole_number(value: &Value) -> Option<i128> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(n) = number.as_i64() {
        return Some(n.into());
    }
    if let Some(n) = number.as_u64() {
        return Some(n.into());
    }
    number
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() <= u64::MAX as f64)
        .map(|f| f as i128)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::safety::REDACTED;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    fn store() -> (Arc<ManualClock>, ConfirmationStore) {
        let clock = Arc::new(ManualClock::new());
        let store = ConfirmationStore::with_clock(clock.clone());
        (clock, store)
    }

    fn webhook_params() -> Params {
        params(json!({"owner": "acme", "repo": "demo", "hook_id": 123}))
    }

    #[test]
    fn test_token_format() {
        let (_clock, store) = store();
        let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);

        assert_eq!(token.token.len(), 17);
        assert!(token.token.starts_with("CONF:"));
        assert!(is_token_format(&token.token));
        assert_eq!(token.expires_at - token.created_at, Duration::minutes(5));
        assert!(!token.used);
    }

    #[test]
    fn test_is_token_format() {
        assert!(is_token_format("CONF:0123456789ab"));
        assert!(!is_token_format("CONF:0123456789AB"));
        assert!(!is_token_format("CONF:0123456789a"));
        assert!(!is_token_format("conf:0123456789ab"));
        assert!(!is_token_format("CONF:0123456789ag"));
    }

    #[test]
    fn test_tokens_are_distinct() {
        let (_clock, store) = store();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);
            assert!(seen.insert(token.token));
        }
        assert_eq!(store.active_count(), 100);
    }

    #[test]
    fn test_validate_consumes_token() {
        let (_clock, store) = store();
        let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);

        assert!(store.validate(&token.token, "delete_webhook", &webhook_params()).is_ok());
        assert_eq!(store.active_count(), 0);

        let second = store.validate(&token.token, "delete_webhook", &webhook_params());
        assert_eq!(second, Err(SafetyError::ConfirmationInvalid));
    }

    #[test]
    fn test_unknown_token() {
        let (_clock, store) = store();
        let result = store.validate("CONF:000000000000", "delete_webhook", &webhook_params());
        assert_eq!(result, Err(SafetyError::ConfirmationInvalid));
    }

    #[test]
    fn test_expired_token_is_removed() {
        let (clock, store) = store();
        let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);

        clock.advance(Duration::minutes(5));
        let result = store.validate(&token.token, "delete_webhook", &webhook_params());
        assert_eq!(result, Err(SafetyError::ConfirmationExpired));
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_token_valid_just_before_expiry() {
        let (clock, store) = store();
        let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);

        clock.advance(Duration::minutes(5) - Duration::milliseconds(1));
        assert!(store.validate(&token.token, "delete_webhook", &webhook_params()).is_ok());
    }

    #[test]
    fn test_operation_mismatch_keeps_token() {
        let (_clock, store) = store();
        let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);

        let result = store.validate(&token.token, "delete_repository", &webhook_params());
        assert!(matches!(
            result,
            Err(SafetyError::ConfirmationMismatch(MismatchKind::Operation { .. }))
        ));
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_critical_parameter_mismatch() {
        let (_clock, store) = store();
        let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);

        let evil = params(json!({"owner": "evil", "repo": "demo", "hook_id": 123}));
        let result = store.validate(&token.token, "delete_webhook", &evil);
        assert_eq!(
            result,
            Err(SafetyError::ConfirmationMismatch(MismatchKind::Parameter(
                "owner".to_string()
            )))
        );

        let other_hook = params(json!({"owner": "acme", "repo": "demo", "hook_id": 124}));
        assert!(store.validate(&token.token, "delete_webhook", &other_hook).is_err());
    }

    #[test]
    fn test_whole_number_ids_bind_by_value() {
        let (_clock, store) = store();

        let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);
        let as_float = params(json!({"owner": "acme", "repo": "demo", "hook_id": 123.0}));
        assert_eq!(store.validate(&token.token, "delete_webhook", &as_float), Ok(()));

        let issued_float = params(json!({"owner": "acme", "repo": "demo", "hook_id": 123.0}));
        let token = store.generate("delete_webhook", &issued_float, RiskLevel::High);
        assert_eq!(store.validate(&token.token, "delete_webhook", &webhook_params()), Ok(()));

        let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);
        for other in [json!(124.0), json!(123.5), json!("123")] {
            let p = params(json!({"owner": "acme", "repo": "demo", "hook_id": other}));
            assert_eq!(
                store.validate(&token.token, "delete_webhook", &p),
                Err(SafetyError::ConfirmationMismatch(MismatchKind::Parameter(
                    "hook_id".to_string()
                )))
            );
        }
    }

    #[test]
    fn test_non_critical_and_absent_keys_ignored() {
        let (_clock, store) = store();
        let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);

        // Extra non-critical key, and hook_id missing on the retry
        let retry = params(json!({"owner": "acme", "repo": "demo", "dry_run": false}));
        assert!(store.validate(&token.token, "delete_webhook", &retry).is_ok());
    }

    #[test]
    fn test_snapshot_is_sanitised() {
        let (_clock, store) = store();
        let with_secret = params(json!({
            "owner": "acme",
            "repo": "demo",
            "secret": "hunter2",
            "confirmation_token": "CONF:aaaaaaaaaaaa"
        }));
        let token = store.generate("create_webhook", &with_secret, RiskLevel::Medium);

        assert_eq!(token.parameters["secret"], json!(REDACTED));
        assert_eq!(token.parameters["confirmation_token"], json!(REDACTED));
        assert_eq!(token.parameters["owner"], json!("acme"));

        // Sensitive keys are never compared
        let retry = params(json!({"owner": "acme", "repo": "demo", "secret": "other"}));
        assert!(store.validate(&token.token, "create_webhook", &retry).is_ok());
    }

    #[test]
    fn test_cleanup_all_expired() {
        let (clock, store) = store();
        store.generate("delete_webhook", &webhook_params(), RiskLevel::High);
        clock.advance(Duration::minutes(3));
        store.generate("delete_webhook", &webhook_params(), RiskLevel::High);

        clock.advance(Duration::minutes(3));
        assert_eq!(store.cleanup_all_expired(), 1);
        assert_eq!(store.active_count(), 1);

        clock.advance(Duration::minutes(3));
        assert_eq!(store.cleanup_all_expired(), 1);
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_clear_all() {
        let (_clock, store) = store();
        for _ in 0..5 {
            store.generate("delete_webhook", &webhook_params(), RiskLevel::High);
        }
        store.clear_all();
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_concurrent_validation_consumes_once() {
        let (_clock, store) = store();
        let store = Arc::new(store);
        let token = store.generate("delete_webhook", &webhook_params(), RiskLevel::High);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let token = token.token.clone();
                std::thread::spawn(move || {
                    store
                        .validate(&token, "delete_webhook", &webhook_params())
                        .is_ok()
                })
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_reclaims_token() {
        let clock = Arc::new(ManualClock::new());
        let store = ConfirmationStore::with_clock(clock.clone());
        store.generate("delete_webhook", &webhook_params(), RiskLevel::High);

        clock.advance(Duration::minutes(6) + Duration::seconds(1));
        tokio::time::sleep(std::time::Duration::from_secs(6 * 60 + 1)).await;
        tokio::task::yield_now().await;

        assert_eq!(store.active_count(), 0);
    }
}
