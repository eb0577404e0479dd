pub mod logger;
pub mod query;

pub use logger::{AuditEntry, AuditError, AuditLogger, AuditResult, truncate_token};
pub use query::{
    AuditStatistics, cleanup_old, filter_by_operation, filter_by_result, filter_by_risk_level,
    read_all, recent, statistics,
};
