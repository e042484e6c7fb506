//! Runtime configuration
//!
//! Handles parsing and management of `evio.toml` files:
//!
//! ```toml
//! [selector]
//! backend = "epoll"
//! max_events = 128
//!
//! [event_loop]
//! poll_timeout_ms = 50
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// File name searched for by [`RuntimeConfig::find_and_load`].
pub const CONFIG_FILE_NAME: &str = "evio.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching `evio.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub event_loop: EventLoopConfig,
}

impl RuntimeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir()?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    ///
    /// Falls back to defaults when no file exists up to the root.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.selector.max_events == 0 {
            return Err(ConfigError::Invalid(
                "selector.max_events must be positive".to_string(),
            ));
        }
        if cfg!(not(target_os = "linux")) && self.selector.backend == SelectorBackend::Epoll {
            return Err(ConfigError::Invalid(
                "selector.backend = \"epoll\" requires Linux".to_string(),
            ));
        }
        Ok(())
    }
}

/// Multiplexing syscall used by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectorBackend {
    #[default]
    Poll,
    Epoll,
}

/// Selector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default)]
    pub backend: SelectorBackend,

    /// Initial table size for poll, events per wait for epoll
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

fn default_max_events() -> usize {
    64
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            backend: SelectorBackend::Poll,
            max_events: default_max_events(),
        }
    }
}

/// Event loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLoopConfig {
    /// Wait applied when neither a timer nor the caller bounds the poll
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_poll_timeout_ms() -> u64 {
    100
}

impl EventLoopConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.selector.backend, SelectorBackend::Poll);
        assert_eq!(config.selector.max_events, 64);
        assert_eq!(config.event_loop.poll_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[selector]
max_events = 16

[event_loop]
poll_timeout_ms = 5
"#;
        let config = RuntimeConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.selector.backend, SelectorBackend::Poll);
        assert_eq!(config.selector.max_events, 16);
        assert_eq!(config.event_loop.poll_timeout_ms, 5);
    }

    #[test]
    fn test_backend_names() {
        let config = RuntimeConfig::from_toml_str("[selector]\nbackend = \"poll\"\n").unwrap();
        assert_eq!(config.selector.backend, SelectorBackend::Poll);
        assert!(matches!(
            RuntimeConfig::from_toml_str("[selector]\nbackend = \"kqueue\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_max_events_rejected() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("[selector]\nmax_events = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_save_and_find() {
        let dir = std::env::temp_dir().join(format!("evio-config-{}", std::process::id()));
        let nested = dir.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let mut config = RuntimeConfig::default();
        config.event_loop.poll_timeout_ms = 7;
        config.save(&dir.join(CONFIG_FILE_NAME)).unwrap();

        let found = RuntimeConfig::find_and_load(&nested).unwrap();
        assert_eq!(found, config);

        assert!(matches!(
            RuntimeConfig::load(&nested.join(CONFIG_FILE_NAME)),
            Err(ConfigError::NotFound(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
