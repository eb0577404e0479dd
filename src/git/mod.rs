pub mod executor;
pub mod parser;
pub mod tools;

// Re-export commonly used types
pub use executor::{ALLOWED_GIT_SUBCOMMANDS, CommandOutput, GitExecutor};
pub use parser::{
    BranchEntry, CommitEntry, FileStatus, StatusEntry, StatusReport, parse_branch_list,
    parse_log, parse_status_porcelain_v2,
};
pub use tools::LocalGit;
