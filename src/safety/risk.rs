//! Risk classification for administrative forge operations.
//!
//! The table below is the authority on what counts as an administrative
//! operation. Anything not listed bypasses the safety layer entirely.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::safety::error::SafetyError;

/// Risk level of an operation, ordered from least to most dangerous
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// Read-only
    Low,
    /// Reversible write
    Medium,
    /// Destructive
    High,
    /// Irreversible
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Marker shown in front of confirmation prompts
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::High => "⚠️",
            Self::Critical => "💣",
            _ => "ℹ️",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

/// Static risk profile of one administrative operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationRisk {
    pub level: RiskLevel,
    pub category: &'static str,
    pub description: &'static str,
    pub requires_dry_run: bool,
    pub requires_confirmation: bool,
    pub requires_backup: bool,
    pub requires_audit: bool,
}

impl OperationRisk {
    const fn new(
        level: RiskLevel,
        category: &'static str,
        description: &'static str,
        requires_dry_run: bool,
        requires_confirmation: bool,
        requires_backup: bool,
    ) -> Self {
        Self {
            level,
            category,
            description,
            requires_dry_run,
            requires_confirmation,
            requires_backup,
            requires_audit: true,
        }
    }

    const fn read(category: &'static str, description: &'static str) -> Self {
        Self::new(RiskLevel::Low, category, description, false, false, false)
    }
}

pub const REPOSITORY_SETTINGS: &str = "repository_settings";
pub const BRANCH_PROTECTION: &str = "branch_protection";
pub const WEBHOOKS: &str = "webhooks";
pub const COLLABORATORS: &str = "collaborators";
pub const TEAMS: &str = "teams";

use RiskLevel::{Critical, High, Medium};

const ADMIN_OPERATIONS: &[(&str, OperationRisk)] = &[
    // Repository settings
    (
        "get_repo_settings",
        OperationRisk::read(REPOSITORY_SETTINGS, "Reads repository settings"),
    ),
    (
        "update_repo_settings",
        OperationRisk::new(
            Medium,
            REPOSITORY_SETTINGS,
            "Modifies repository settings such as visibility and enabled features",
            true,
            false,
            true,
        ),
    ),
    (
        "archive_repository",
        OperationRisk::new(
            Critical,
            REPOSITORY_SETTINGS,
            "Archives the repository and makes it read-only for everyone",
            true,
            true,
            true,
        ),
    ),
    (
        "delete_repository",
        OperationRisk::new(
            Critical,
            REPOSITORY_SETTINGS,
            "Permanently deletes the repository with all issues, pull requests and history",
            true,
            true,
            true,
        ),
    ),
    // Branch protection
    (
        "get_branch_protection",
        OperationRisk::read(BRANCH_PROTECTION, "Reads branch protection rules"),
    ),
    (
        "update_branch_protection",
        OperationRisk::new(
            High,
            BRANCH_PROTECTION,
            "Changes branch protection rules; weaker rules let unreviewed changes land",
            true,
            true,
            true,
        ),
    ),
    (
        "delete_branch_protection",
        OperationRisk::new(
            Critical,
            BRANCH_PROTECTION,
            "Removes every protection rule from the branch",
            true,
            true,
            true,
        ),
    ),
    // Webhooks
    (
        "list_webhooks",
        OperationRisk::read(WEBHOOKS, "Lists repository webhooks"),
    ),
    (
        "create_webhook",
        OperationRisk::new(
            Medium,
            WEBHOOKS,
            "Creates a webhook that will receive repository events",
            true,
            false,
            false,
        ),
    ),
    (
        "update_webhook",
        OperationRisk::new(
            Medium,
            WEBHOOKS,
            "Changes where and which repository events a webhook delivers",
            true,
            false,
            true,
        ),
    ),
    (
        "delete_webhook",
        OperationRisk::new(
            High,
            WEBHOOKS,
            "Deletes the webhook; its configuration and delivery history are lost",
            true,
            true,
            true,
        ),
    ),
    (
        "test_webhook",
        OperationRisk::read(WEBHOOKS, "Sends a test delivery to an existing webhook"),
    ),
    // Collaborators
    (
        "list_collaborators",
        OperationRisk::read(COLLABORATORS, "Lists repository collaborators"),
    ),
    (
        "check_collaborator",
        OperationRisk::read(COLLABORATORS, "Checks whether a user is a collaborator"),
    ),
    (
        "add_collaborator",
        OperationRisk::new(
            Medium,
            COLLABORATORS,
            "Grants a user access to the repository",
            true,
            false,
            false,
        ),
    ),
    (
        "update_collaborator_permission",
        OperationRisk::new(
            Medium,
            COLLABORATORS,
            "Changes the permission level of an existing collaborator",
            true,
            false,
            false,
        ),
    ),
    (
        "remove_collaborator",
        OperationRisk::new(
            High,
            COLLABORATORS,
            "Revokes a user's access to the repository",
            true,
            true,
            true,
        ),
    ),
    (
        "list_invitations",
        OperationRisk::read(COLLABORATORS, "Lists pending repository invitations"),
    ),
    (
        "accept_invitation",
        OperationRisk::new(
            Medium,
            COLLABORATORS,
            "Accepts a repository invitation on behalf of the authenticated user",
            true,
            false,
            false,
        ),
    ),
    (
        "cancel_invitation",
        OperationRisk::new(
            Medium,
            COLLABORATORS,
            "Cancels a pending repository invitation",
            true,
            false,
            false,
        ),
    ),
    // Teams
    (
        "list_repo_teams",
        OperationRisk::read(TEAMS, "Lists teams with access to the repository"),
    ),
    (
        "add_repo_team",
        OperationRisk::new(
            Medium,
            TEAMS,
            "Grants a team access to the repository",
            true,
            false,
            false,
        ),
    ),
];

/// Look up the risk profile of an operation
pub fn classify(operation: &str) -> Option<&'static OperationRisk> {
    ADMIN_OPERATIONS
        .iter()
        .find(|(name, _)| *name == operation)
        .map(|(_, risk)| risk)
}

/// Like [`classify`], but an unknown operation is an error
pub fn require(operation: &str) -> Result<&'static OperationRisk, SafetyError> {
    classify(operation).ok_or_else(|| SafetyError::UnknownOperation(operation.to_string()))
}

pub fn is_admin(operation: &str) -> bool {
    classify(operation).is_some()
}

pub fn admin_operations() -> impl Iterator<Item = &'static str> {
    ADMIN_OPERATIONS.iter().map(|(name, _)| *name)
}

pub fn list_by_level(level: RiskLevel) -> Vec<&'static str> {
    ADMIN_OPERATIONS
        .iter()
        .filter(|(_, risk)| risk.level == level)
        .map(|(name, _)| *name)
        .collect()
}

pub fn list_by_category(category: &str) -> Vec<&'static str> {
    ADMIN_OPERATIONS
        .iter()
        .filter(|(_, risk)| risk.category == category)
        .map(|(name, _)| *name)
        .collect()
}

/// Distinct categories, in table order
pub fn categories() -> Vec<&'static str> {
    let mut seen = Vec::new();
    for (_, risk) in ADMIN_OPERATIONS {
        if !seen.contains(&risk.category) {
            seen.push(risk.category);
        }
    }
    seen
}
