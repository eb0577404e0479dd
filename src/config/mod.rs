pub mod settings;

pub use settings::{ConfigError, ForgeSettings, GitSettings, LoggingSettings, Settings};
