use std::fmt;
use thiserror::Error;

use crate::safety::validator::ValidationError;

/// What a confirmation token failed to match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchKind {
    /// Token was issued for a different operation
    Operation { expected: String, actual: String },
    /// A critical parameter differs between issue and use
    Parameter(String),
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation { expected, actual } => write!(
                f,
                "operation mismatch: token was issued for '{}', not '{}'",
                expected, actual
            ),
            Self::Parameter(key) => write!(f, "parameters mismatch on '{}'", key),
        }
    }
}

/// Reasons the safety layer refuses (or defers) an administrative call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SafetyError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid parameter '{parameter}': {reason}")]
    ParameterValidation { parameter: String, reason: String },

    #[error("Dry-run required for {0}")]
    DryRunRequired(String),

    #[error("Dry-run preview for {0}")]
    DryRunPreview(String),

    #[error("Confirmation required, token {token} issued")]
    ConfirmationRequired { token: String },

    #[error("Confirmation token is invalid or has already been used")]
    ConfirmationInvalid,

    #[error("Confirmation token has expired")]
    ConfirmationExpired,

    #[error("Confirmation token has already been used")]
    ConfirmationUsed,

    #[error("Confirmation token does not match this call: {0}")]
    ConfirmationMismatch(MismatchKind),

    #[error("Operation denied: {0}")]
    Denied(String),
}

impl From<ValidationError> for SafetyError {
    fn from(err: ValidationError) -> Self {
        SafetyError::ParameterValidation {
            parameter: err.parameter,
            reason: err.reason,
        }
    }
}
