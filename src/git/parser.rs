use serde::Serialize;

use crate::error::{GitError, GitResult};

/// Field separator used in `git log --format`
pub const LOG_FIELD_SEPARATOR: char = '\x1f';
/// `git log --format` producing what [`parse_log`] expects
pub const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%aI%x1f%s";

/// Parse `git status --porcelain=v2 --branch` output
pub fn parse_status_porcelain_v2(output: &str) -> GitResult<StatusReport> {
    let mut report = StatusReport::default();

    for line in output.lines() {
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix("# ") {
            parse_branch_header(header, &mut report)?;
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "1" => {
                // 1 <XY> <sub> <mH> <mI> <mW> <hH> <hI> <path>
                if parts.len() >= 9 {
                    report.entries.push(tracked_entry(parts[1], parts[8..].join(" ")));
                }
            }
            "2" => {
                // 2 <XY> <sub> <mH> <mI> <mW> <hH> <hI> <X><score> <path>\t<orig>
                if let Some(rest) = line.splitn(10, ' ').nth(9) {
                    let path = rest.split('\t').next().unwrap_or_default().to_string();
                    let mut entry = tracked_entry(parts[1], path);
                    entry.status = FileStatus::Renamed;
                    report.entries.push(entry);
                }
            }
            "u" => {
                if parts.len() >= 11 {
                    report.entries.push(StatusEntry {
                        status: FileStatus::Conflicted,
                        path: parts[10..].join(" "),
                        staged: false,
                        unstaged: true,
                    });
                }
            }
            "?" => {
                if parts.len() >= 2 {
                    report.entries.push(StatusEntry {
                        status: FileStatus::Untracked,
                        path: parts[1..].join(" "),
                        staged: false,
                        unstaged: false,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(report)
}

fn tracked_entry(xy: &str, path: String) -> StatusEntry {
    let status = match xy {
        "M." | ".M" | "MM" => FileStatus::Modified,
        "A." | ".A" | "AM" => FileStatus::Added,
        "D." | ".D" => FileStatus::Deleted,
        _ => FileStatus::Unknown,
    };

    StatusEntry {
        status,
        path,
        staged: !xy.starts_with('.'),
        unstaged: xy.chars().nth(1).is_some_and(|c| c != '.'),
    }
}

fn parse_branch_header(header: &str, report: &mut StatusReport) -> GitResult<()> {
    let Some((key, value)) = header.split_once(' ') else {
        return Ok(());
    };

    match key {
        "branch.head" => {
            report.branch = (value != "(detached)").then(|| value.to_string());
        }
        "branch.upstream" => report.upstream = Some(value.to_string()),
        "branch.ab" => {
            // +<ahead> -<behind>
            for part in value.split_whitespace() {
                let parse = |n: &str| {
                    n.parse::<u32>()
                        .map_err(|_| GitError::ParseError(format!("bad branch.ab: {}", value)))
                };
                if let Some(n) = part.strip_prefix('+') {
                    report.ahead = parse(n)?;
                } else if let Some(n) = part.strip_prefix('-') {
                    report.behind = parse(n)?;
                }
            }
        }
        _ => {}
    }

    Ok(())
}

/// Parse `git log` output produced with [`LOG_FORMAT`]
pub fn parse_log(output: &str) -> GitResult<Vec<CommitEntry>> {
    let mut commits = Vec::new();

    for line in output.lines() {
        if line.is_empty() {
            continue;
        }

        let mut fields = line.splitn(4, LOG_FIELD_SEPARATOR);
        let hash = fields.next().unwrap_or_default();
        if hash.is_empty() {
            return Err(GitError::ParseError(format!("missing commit hash: {}", line)));
        }

        commits.push(CommitEntry {
            hash: hash.to_string(),
            author: fields.next().unwrap_or_default().to_string(),
            date: fields.next().unwrap_or_default().to_string(),
            message: fields.next().unwrap_or_default().to_string(),
        });
    }

    Ok(commits)
}

/// Parse `git branch -v` output
pub fn parse_branch_list(output: &str) -> GitResult<Vec<BranchEntry>> {
    let mut branches = Vec::new();

    for line in output.lines() {
        if line.is_empty() {
            continue;
        }

        // * main abc1234 Commit message
        //   feature-x def5678 Feature work
        let is_current = line.starts_with('*');
        let line = line.trim_start_matches('*').trim();

        // Detached HEAD shows up as "(HEAD detached at abc1234)"
        if line.starts_with('(') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            continue;
        };

        branches.push(BranchEntry {
            name: name.to_string(),
            commit: parts.next().map(str::to_string),
            is_current,
        });
    }

    Ok(branches)
}

/// Branch header plus file entries from `git status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// `None` on a detached HEAD
    pub branch: Option<String>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Represents a file status entry from git status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub status: FileStatus,
    pub path: String,
    pub staged: bool,
    pub unstaged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Modified,
    Added,
    Deleted,
    Renamed,
    Conflicted,
    Untracked,
    Unknown,
}

/// Represents a commit from git log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitEntry {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// Represents a branch from git branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchEntry {
    pub name: String,
    pub commit: Option<String>,
    pub is_current: bool,
}
