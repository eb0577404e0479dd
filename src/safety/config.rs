//! Safety configuration, stored as JSON.
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "safetyMode": "moderate",
//!   "globalSettings": {
//!     "enableAuditLog": true,
//!     "auditLogPath": "~/.config/gitwarden/audit.log",
//!     "requireConfirmationAbove": "HIGH",
//!     "enableAutoBackup": true,
//!     "backupPath": "~/.config/gitwarden/backups"
//!   }
//! }
//! ```
//!
//! Missing keys take their defaults. An absent file means default config.
//! A leading `~` in either path is resolved against `HOME`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::audit::logger::{DEFAULT_MAX_BACKUPS, DEFAULT_MAX_LOG_SIZE};
use crate::config::ConfigError;
use crate::safety::risk::RiskLevel;

pub const CONFIG_VERSION: &str = "1.0";
pub const CONFIG_PATH_ENV: &str = "GITWARDEN_SAFETY_CONFIG";

/// How strictly the guard contracts are composed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SafetyMode {
    Strict,
    #[default]
    Moderate,
    Permissive,
    Disabled,
}

impl SafetyMode {
    pub const ALL: [SafetyMode; 4] = [
        SafetyMode::Strict,
        SafetyMode::Moderate,
        SafetyMode::Permissive,
        SafetyMode::Disabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "STRICT",
            Self::Moderate => "MODERATE",
            Self::Permissive => "PERMISSIVE",
            Self::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafetyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "moderate" => Ok(Self::Moderate),
            "permissive" => Ok(Self::Permissive),
            "disabled" => Ok(Self::Disabled),
            _ => Err(format!("Unknown safety mode: {}", s)),
        }
    }
}

/// Process-wide safety configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyConfig {
    pub mode: SafetyMode,
    pub enable_audit_log: bool,
    pub audit_log_path: PathBuf,
    /// Lowest level that needs a confirmation token in moderate mode
    pub require_confirmation_above: RiskLevel,
    pub require_dry_run_above: RiskLevel,
    pub enable_auto_backup: bool,
    pub backup_path: PathBuf,
    pub audit_max_size_bytes: u64,
    pub audit_max_backups: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default = "default_mode")]
    safety_mode: String,
    #[serde(default)]
    global_settings: GlobalSettings,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GlobalSettings {
    enable_audit_log: bool,
    audit_log_path: PathBuf,
    require_confirmation_above: String,
    require_dry_run_above: String,
    enable_auto_backup: bool,
    backup_path: PathBuf,
    audit_max_size_bytes: u64,
    audit_max_backups: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        SafetyConfig::default().to_global_settings()
    }
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

fn default_mode() -> String {
    SafetyMode::default().as_str().to_lowercase()
}

/// `~/.config/gitwarden`, or `.gitwarden` when HOME is unset
fn base_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".config").join("gitwarden"),
        Err(_) => PathBuf::from(".gitwarden"),
    }
}

/// Resolve a leading `~` component against `home`
fn expand_home(path: PathBuf, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return path;
    };
    match path.strip_prefix("~") {
        Ok(rest) if rest.as_os_str().is_empty() => home.to_path_buf(),
        Ok(rest) => home.join(rest),
        Err(_) => path,
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        let base = base_dir();
        Self {
            mode: SafetyMode::Moderate,
            enable_audit_log: true,
            audit_log_path: base.join("audit.log"),
            require_confirmation_above: RiskLevel::High,
            require_dry_run_above: RiskLevel::Medium,
            enable_auto_backup: true,
            backup_path: base.join("backups"),
            audit_max_size_bytes: DEFAULT_MAX_LOG_SIZE,
            audit_max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

impl SafetyConfig {
    /// Config path from `GITWARDEN_SAFETY_CONFIG`, else `~/.config/gitwarden/safety.json`
    pub fn default_path() -> PathBuf {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => base_dir().join("safety.json"),
        }
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(contents)?;
        let config = Self::from_file(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate and write as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            version: CONFIG_VERSION.to_string(),
            safety_mode: self.mode.as_str().to_lowercase(),
            global_settings: self.to_global_settings(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enable_audit_log && self.audit_log_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "auditLogPath must be set when the audit log is enabled".to_string(),
            ));
        }

        if self.enable_auto_backup && self.backup_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "backupPath must be set when auto-backup is enabled".to_string(),
            ));
        }

        if self.audit_max_size_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "auditMaxSizeBytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let g = file.global_settings;
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Ok(Self {
            mode: file.safety_mode.parse().map_err(ConfigError::InvalidValue)?,
            enable_audit_log: g.enable_audit_log,
            audit_log_path: expand_home(g.audit_log_path, home.as_deref()),
            require_confirmation_above: g
                .require_confirmation_above
                .parse()
                .map_err(ConfigError::InvalidValue)?,
            require_dry_run_above: g
                .require_dry_run_above
                .parse()
                .map_err(ConfigError::InvalidValue)?,
            enable_auto_backup: g.enable_auto_backup,
            backup_path: expand_home(g.backup_path, home.as_deref()),
            audit_max_size_bytes: g.audit_max_size_bytes,
            audit_max_backups: g.audit_max_backups,
        })
    }

    fn to_global_settings(&self) -> GlobalSettings {
        GlobalSettings {
            enable_audit_log: self.enable_audit_log,
            audit_log_path: self.audit_log_path.clone(),
            require_confirmation_above: self.require_confirmation_above.to_string(),
            require_dry_run_above: self.require_dry_run_above.to_string(),
            enable_auto_backup: self.enable_auto_backup,
            backup_path: self.backup_path.clone(),
            audit_max_size_bytes: self.audit_max_size_bytes,
            audit_max_backups: self.audit_max_backups,
        }
    }
}
