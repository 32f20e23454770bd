//! Configuration management for crash-bridge

mod bridge;
pub mod serde_utils;

pub use bridge::{BridgeConfig, CrashConfig, ReverseConnectionConfig, TraceConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crash-bridge")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a TOML file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    tracing::debug!("Loaded config from {:?}", path);
    Ok(config)
}

/// Save configuration to a TOML file, creating parent directories
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config::<BridgeConfig>(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = BridgeConfig::default();
        config.reverse.orchestrator_url = "http://orchestrator:9000".to_string();
        config.reverse.heartbeat_interval = Duration::from_secs(5);
        save_config(&path, &config).unwrap();

        let loaded: BridgeConfig = load_config(&path).unwrap();
        assert_eq!(loaded.reverse.orchestrator_url, "http://orchestrator:9000");
        assert_eq!(loaded.reverse.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(loaded.listen_address, config.listen_address);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[reverse]\nenabled = false\n").unwrap();

        let loaded: BridgeConfig = load_config(&path).unwrap();
        assert!(!loaded.reverse.enabled);
        assert_eq!(loaded.reverse.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(loaded.crash.crash_binary, "crash");
    }
}
