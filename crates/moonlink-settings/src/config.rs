//! Configuration Management
//!
//! Provides the client configuration: which backend to talk to, the call
//! timeout and reconnection cadence, and how to log. Files are TOML or JSON,
//! selected by extension.

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`ConnectionSettings::host`]
pub const HOST_ENV_VAR: &str = "MOONLINK_HOST";

/// Application directory name under the platform config directory
const APP_DIR: &str = "moonlink";

/// Default configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Backend `host[:port]`; no connection is made while unset or blank
    pub host: Option<String>,
    /// Time a call may wait for its response, in milliseconds
    pub call_timeout_ms: u64,
    /// Delay between reconnection attempts, in milliseconds
    pub reconnect_interval_ms: u64,
    /// Capacity of the client event buffer
    pub event_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: None,
            call_timeout_ms: 10_000,
            reconnect_interval_ms: 3_000,
            event_capacity: 100,
        }
    }
}

impl ConnectionSettings {
    /// WebSocket endpoint for the configured host
    ///
    /// Returns `None` when the host is unset or blank.
    pub fn websocket_url(&self) -> Option<String> {
        self.host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(|host| format!("ws://{}/websocket", host))
    }

    /// Replace the host when `value` is present
    pub fn override_host(&mut self, value: Option<String>) {
        if let Some(host) = value {
            self.host = Some(host);
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.call_timeout_ms == 0 {
            return Err(out_of_range("connection.call_timeout_ms", self.call_timeout_ms));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(out_of_range(
                "connection.reconnect_interval_ms",
                self.reconnect_interval_ms,
            ));
        }
        if self.event_capacity == 0 {
            return Err(out_of_range("connection.event_capacity", self.event_capacity));
        }

        if let Some(host) = self.host.as_deref().map(str::trim) {
            let reason = if host.contains("://") {
                Some("must not include a scheme")
            } else if host.contains('/') {
                Some("must not include a path")
            } else if host.chars().any(char::is_whitespace) {
                Some("must not contain whitespace")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ConfigError::InvalidHost {
                    host: host.to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load config from `path`, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, content).map_err(|e| {
            SettingsError::SaveError(format!("{}: {}", path.display(), e))
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.connection.validate()?;

        if self.logging.level.trim().is_empty() {
            return Err(out_of_range("logging.level", "\"\""));
        }

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.connection
            .override_host(std::env::var(HOST_ENV_VAR).ok());
    }
}

/// Platform configuration directory for the application
pub fn config_dir() -> ConfigResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| {
            ConfigError::UnsupportedPlatform("no configuration directory".to_string())
        })
}

/// Default configuration file path
pub fn default_config_path() -> ConfigResult<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Create the configuration directory if needed and return it
pub fn ensure_config_dir() -> SettingsResult<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir)
        .map_err(|e| SettingsError::ConfigDirectory(format!("{}: {}", dir.display(), e)))?;
    Ok(dir)
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

fn out_of_range(key: &str, value: impl std::fmt::Display) -> ConfigError {
    ConfigError::ValueOutOfRange {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.connection.call_timeout_ms, 10_000);
        assert_eq!(config.connection.reconnect_interval_ms, 3_000);
        assert_eq!(config.connection.event_capacity, 100);
        assert_eq!(config.connection.host, None);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_websocket_url() {
        let mut connection = ConnectionSettings::default();
        assert_eq!(connection.websocket_url(), None);

        connection.host = Some("   ".to_string());
        assert_eq!(connection.websocket_url(), None);

        connection.host = Some("printer.local:7125".to_string());
        assert_eq!(
            connection.websocket_url().as_deref(),
            Some("ws://printer.local:7125/websocket")
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::new();
        config.connection.call_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValueOutOfRange { ref key, .. }) if key == "connection.call_timeout_ms"
        ));

        let mut config = Config::new();
        config.connection.reconnect_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::new();
        config.connection.event_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_urls_as_host() {
        let mut config = Config::new();
        config.connection.host = Some("ws://printer.local".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHost { .. })
        ));

        config.connection.host = Some("printer.local/websocket".to_string());
        assert!(config.validate().is_err());

        config.connection.host = Some("printer.local:7125".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_override_host() {
        let mut connection = ConnectionSettings {
            host: Some("old".to_string()),
            ..ConnectionSettings::default()
        };
        connection.override_host(None);
        assert_eq!(connection.host.as_deref(), Some("old"));

        connection.override_host(Some("new".to_string()));
        assert_eq!(connection.host.as_deref(), Some("new"));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = Config::new()
            .save_to_file(Path::new("config.yaml"))
            .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Config(ConfigError::UnsupportedFormat(ref ext)) if ext == "yaml"
        ));
    }
}
