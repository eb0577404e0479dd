use gitwarden::audit::AuditError;
use gitwarden::config::ConfigError;
use gitwarden::error::{AppError, AppResult, GitError};
use gitwarden::forge::ForgeError;
use gitwarden::safety::{MismatchKind, SafetyError, ValidationError};
use gitwarden::server::ServerError;
use std::error::Error;

/// Test that GitError converts to AppError::Git
#[test]
fn test_git_error_converts_to_app_error() {
    let git_err = GitError::NotARepository("/tmp/x".to_string());
    let app_err: AppError = git_err.into();
    assert!(matches!(app_err, AppError::Git(_)));
}

/// Test that ConfigError converts to AppError::Config
#[test]
fn test_config_error_converts_to_app_error() {
    let app_err: AppError = ConfigError::DirectoryNotFound.into();
    assert!(matches!(app_err, AppError::Config(_)));
}

#[test]
fn test_safety_error_converts_to_app_error() {
    let app_err: AppError = SafetyError::ConfirmationExpired.into();
    assert!(matches!(app_err, AppError::Safety(_)));
    assert!(app_err.to_string().contains("expired"));
}

#[test]
fn test_audit_and_forge_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
    let app_err: AppError = AuditError::from(io).into();
    assert!(matches!(app_err, AppError::Audit(_)));

    let app_err: AppError = ForgeError::NotFound("/repos/acme/demo".to_string()).into();
    assert!(matches!(app_err, AppError::Forge(_)));

    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout closed");
    let app_err: AppError = ServerError::from(io).into();
    assert!(matches!(app_err, AppError::Server(_)));
}

/// Validation errors surface as unsafe git arguments and safety failures
#[test]
fn test_validation_error_conversions() {
    let err = ValidationError::new("path", "path traversal detected ('../')");

    let git_err: GitError = err.clone().into();
    assert!(git_err.to_string().contains("path traversal"));

    let safety_err: SafetyError = err.into();
    assert_eq!(
        safety_err,
        SafetyError::ParameterValidation {
            parameter: "path".to_string(),
            reason: "path traversal detected ('../')".to_string(),
        }
    );
}

/// Test that std::io::Error converts to AppError::Io
#[test]
fn test_io_error_converts_to_app_error() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
    let app_err: AppError = io_err.into();
    assert!(matches!(app_err, AppError::Io(_)));
}

/// Test that error source is preserved
#[test]
fn test_error_source_preserved() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test file");
    let app_err: AppError = GitError::IoError(io_err).into();
    assert!(app_err.source().is_some());
}

#[test]
fn test_app_error_display() {
    let msg = AppError::Git(GitError::CommandFailed("test".to_string())).to_string();
    assert!(msg.contains("Git error"));
    assert!(msg.contains("test"));

    let msg = AppError::Config(ConfigError::DirectoryNotFound).to_string();
    assert!(msg.contains("Configuration error"));

    let mismatch = SafetyError::ConfirmationMismatch(MismatchKind::Parameter("owner".to_string()));
    let msg = AppError::Safety(mismatch).to_string();
    assert!(msg.contains("parameters mismatch on 'owner'"));
}

/// Test that ? operator works with AppError
#[test]
fn test_question_mark_operator() {
    fn may_fail() -> Result<(), GitError> {
        Err(GitError::Timeout(30))
    }

    fn outer() -> AppResult<()> {
        may_fail()?;
        Ok(())
    }

    assert!(matches!(outer().unwrap_err(), AppError::Git(GitError::Timeout(30))));
}

#[test]
fn test_transient_forge_errors() {
    assert!(ForgeError::RateLimitExceeded(60).is_transient());
    assert!(
        ForgeError::ApiError {
            status: 502,
            message: "Bad Gateway".to_string()
        }
        .is_transient()
    );
    assert!(
        !ForgeError::ApiError {
            status: 422,
            message: "Validation Failed".to_string()
        }
        .is_transient()
    );
    assert!(!ForgeError::NotFound("/x".to_string()).is_transient());
}
