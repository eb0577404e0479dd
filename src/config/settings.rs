use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid safety config JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config directory not found")]
    DirectoryNotFound,

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

/// Process settings for the coprocess
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    pub forge: ForgeSettings,
    pub git: GitSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ForgeSettings {
    pub api_url: String,
    pub token_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GitSettings {
    pub timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Settings {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let home = std::env::var("HOME").map_err(|_| ConfigError::DirectoryNotFound)?;
        Ok(PathBuf::from(home).join(".config").join("gitwarden"))
    }

    /// Get the settings file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Ok(path) => Self::load_or_default(&path),
            Err(ConfigError::DirectoryNotFound) => Ok(Self::default_settings()),
            Err(e) => Err(e),
        }
    }

    /// Load settings from `path`; a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default_settings());
        }
        Self::load_from(path)
    }

    /// Load settings from file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;

        settings.validate()?;

        Ok(settings)
    }

    /// Save settings to file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Validate before saving
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        // Set permissions to 600 (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Create default settings
    pub fn default_settings() -> Self {
        Settings {
            forge: ForgeSettings {
                api_url: "https://api.github.com".to_string(),
                token_env: "GITHUB_TOKEN".to_string(),
                token: None,
                timeout_seconds: 30,
            },
            git: GitSettings {
                timeout_seconds: 30,
                repo_path: None,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.forge.api_url.starts_with("https://") && !self.forge.api_url.starts_with("http://") {
            return Err(ConfigError::InvalidValue(format!(
                "Invalid forge api_url: {}. Must be an http(s) URL",
                self.forge.api_url
            )));
        }

        if self.forge.token_env.is_empty() {
            return Err(ConfigError::InvalidValue(
                "token_env must not be empty".to_string(),
            ));
        }

        if self.forge.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "forge timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.git.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "git timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "Unknown log level: {}. Expected one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }

    /// Get the forge token from the environment or the settings file
    pub fn get_token(&self) -> Option<String> {
        // First try environment variable
        if let Ok(token) = std::env::var(&self.forge.token_env) {
            if !token.is_empty() {
                return Some(token);
            }
        }

        // Fall back to settings file if present
        self.forge.token.clone()
    }

    pub fn has_token(&self) -> bool {
        self.get_token().is_some()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}
