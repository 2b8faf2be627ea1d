//! Moonlink Settings Crate
//!
//! Handles loading, validating and saving the client configuration.

pub mod config;
pub mod error;

pub use config::{
    config_dir, default_config_path, ensure_config_dir, Config, ConnectionSettings,
    LoggingSettings, HOST_ENV_VAR,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
