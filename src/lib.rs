pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod forge;
pub mod git;
pub mod safety;
pub mod server;

// Re-export commonly used types for convenience
pub use error::{AppError, AppResult, GitError, GitResult};
pub use safety::{Params, RiskLevel, SafetyCheck, SafetyConfig, SafetyMode, SafetyPolicy};
pub use server::{Server, ToolDispatcher};
