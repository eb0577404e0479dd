use std::io;
use thiserror::Error;

// Import module-level errors for AppError
use crate::audit::AuditError;
use crate::config::ConfigError;
use crate::forge::ForgeError;
use crate::safety::{SafetyError, ValidationError};
use crate::server::ServerError;

/// Errors that can occur during local git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepository(String),

    #[error("Git command failed: {0}")]
    CommandFailed(String),

    #[error("Git subcommand not allowed: {0}")]
    SubcommandNotAllowed(String),

    #[error("Unsafe git argument: {0}")]
    UnsafeArgument(#[from] ValidationError),

    #[error("Git command timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to parse git output: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Top-level application error that wraps all module-specific errors
///
/// Module errors convert into AppError via `From`, so binaries and glue
/// code can use `?` across module boundaries without losing the source.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Safety check failed: {0}")]
    Safety(#[from] SafetyError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Forge error: {0}")]
    Forge(#[from] ForgeError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for git operations
pub type GitResult<T> = std::result::Result<T, GitError>;

/// Result type for application-level operations
pub type AppResult<T> = std::result::Result<T, AppError>;
