//! Bridge configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Top-level configuration for the bridge daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address the inbound dispatch endpoint binds to
    pub listen_address: String,

    /// Reverse connection to the orchestrator
    pub reverse: ReverseConnectionConfig,

    /// Crash dump analysis
    pub crash: CrashConfig,

    /// Trace script execution
    pub trace: TraceConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8077".to_string(),
            reverse: ReverseConnectionConfig::default(),
            crash: CrashConfig::default(),
            trace: TraceConfig::default(),
        }
    }
}

/// Registration and heartbeat settings for the orchestrator session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverseConnectionConfig {
    /// Whether the bridge registers with the orchestrator at all
    pub enabled: bool,

    /// Base URL of the orchestrator (scheme, host, port)
    pub orchestrator_url: String,

    /// Bearer token sent with registry calls
    pub api_key: Option<String>,

    /// Time between heartbeats
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Per-request timeout for registry calls
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Name this bridge registers under
    pub server_name: String,
}

impl Default for ReverseConnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            orchestrator_url: "http://localhost:8787".to_string(),
            api_key: None,
            heartbeat_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
            server_name: "crash_mcp".to_string(),
        }
    }
}

impl ReverseConnectionConfig {
    /// Full URL for an orchestrator path such as `/api/mcp/connect`
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.orchestrator_url.trim_end_matches('/'), path)
    }

    /// API key, if one is configured and non-empty
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Crash dump analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    /// Directory scanned for crash dumps
    pub dump_dir: PathBuf,

    /// The `crash` executable
    pub crash_binary: String,

    /// Kernel image with debug info, if not auto-detected by `crash`
    pub kernel_path: Option<PathBuf>,

    /// Deadline for a single crash command
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,

    /// Default number of dumps listed
    pub max_dumps: usize,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("/var/crash-dumps"),
            crash_binary: "crash".to_string(),
            kernel_path: None,
            command_timeout: Duration::from_secs(120),
            max_dumps: 10,
        }
    }
}

/// Trace tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// The `bpftrace` executable
    pub bpftrace_binary: String,

    /// Deadline for a trace script when the caller gives none
    #[serde(with = "duration_secs")]
    pub default_timeout: Duration,

    /// Run the tool through `sudo -n`
    pub use_sudo: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            bpftrace_binary: "bpftrace".to_string(),
            default_timeout: Duration::from_secs(30),
            use_sudo: false,
        }
    }
}

impl BridgeConfig {
    /// Apply environment overrides using the given lookup
    ///
    /// Recognized variables: `ENABLE_REVERSE_CONNECTION`, `ORCHESTRATOR_URL`
    /// (alias `DYNAMIC_URL`), `ORCHESTRATOR_API_KEY` (alias `DYNAMIC_API_KEY`),
    /// `HEARTBEAT_INTERVAL` (seconds), `CRASH_BRIDGE_LISTEN`, `CRASH_DUMP_DIR`.
    /// When both a name and its alias are set, the first name wins.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ENABLE_REVERSE_CONNECTION") {
            self.reverse.enabled = parse_bool("ENABLE_REVERSE_CONNECTION", &value)?;
        }
        if let Some(value) = lookup_any(&lookup, &["ORCHESTRATOR_URL", "DYNAMIC_URL"]) {
            self.reverse.orchestrator_url = value;
        }
        if let Some(value) = lookup_any(&lookup, &["ORCHESTRATOR_API_KEY", "DYNAMIC_API_KEY"]) {
            self.reverse.api_key = Some(value).filter(|k| !k.is_empty());
        }
        if let Some(value) = lookup("HEARTBEAT_INTERVAL") {
            self.reverse.heartbeat_interval = parse_secs("HEARTBEAT_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("CRASH_BRIDGE_LISTEN") {
            self.listen_address = value;
        }
        if let Some(value) = lookup("CRASH_DUMP_DIR") {
            self.crash.dump_dir = PathBuf::from(value);
        }
        tracing::debug!(
            enabled = self.reverse.enabled,
            orchestrator = %self.reverse.orchestrator_url,
            "Applied environment overrides"
        );
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Check invariants the rest of the bridge relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.reverse.orchestrator_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "orchestrator_url must start with http:// or https://, got {:?}",
                url
            )));
        }
        if self.reverse.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        if self.reverse.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if self.crash.command_timeout.is_zero() || self.trace.default_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "execution timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn lookup_any<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names.iter().find_map(|name| lookup(name))
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: "expected true/false",
        }),
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason,
    };
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| invalid("expected a number of seconds"))?;
    if secs.is_nan() || secs <= 0.0 {
        return Err(invalid("must be greater than zero"));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid("out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert!(config.reverse.enabled);
        assert_eq!(config.reverse.orchestrator_url, "http://localhost:8787");
        assert_eq!(config.reverse.heartbeat_interval, Duration::from_secs(15));
        assert!(config.reverse.api_key.is_none());
        assert_eq!(config.reverse.server_name, "crash_mcp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BridgeConfig::default();
        config
            .apply_env(env(&[
                ("ENABLE_REVERSE_CONNECTION", "false"),
                ("ORCHESTRATOR_URL", "https://orch.example:8443/"),
                ("ORCHESTRATOR_API_KEY", "secret"),
                ("HEARTBEAT_INTERVAL", "30"),
                ("CRASH_DUMP_DIR", "/tmp/dumps"),
            ]))
            .unwrap();

        assert!(!config.reverse.enabled);
        assert_eq!(config.reverse.bearer_token(), Some("secret"));
        assert_eq!(config.reverse.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.crash.dump_dir, PathBuf::from("/tmp/dumps"));
        assert_eq!(
            config.reverse.endpoint("/api/mcp/connect"),
            "https://orch.example:8443/api/mcp/connect"
        );
    }

    #[test]
    fn test_dynamic_aliases() {
        let mut config = BridgeConfig::default();
        config
            .apply_env(env(&[
                ("DYNAMIC_URL", "http://dynamic.internal:9999"),
                ("DYNAMIC_API_KEY", "k"),
            ]))
            .unwrap();
        assert_eq!(config.reverse.orchestrator_url, "http://dynamic.internal:9999");
        assert_eq!(config.reverse.bearer_token(), Some("k"));

        let mut config = BridgeConfig::default();
        config
            .apply_env(env(&[
                ("ORCHESTRATOR_URL", "http://orch.internal:8787"),
                ("DYNAMIC_URL", "http://dynamic.internal:9999"),
            ]))
            .unwrap();
        assert_eq!(config.reverse.orchestrator_url, "http://orch.internal:8787");
    }

    #[test]
    fn test_validate_rejects_zero_request_timeout() {
        let mut config = BridgeConfig::default();
        config.reverse.request_timeout = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout"));
    }

    #[test]
    fn test_empty_api_key_means_none() {
        let mut config = BridgeConfig::default();
        config
            .apply_env(env(&[("ORCHESTRATOR_API_KEY", "")]))
            .unwrap();
        assert!(config.reverse.bearer_token().is_none());
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = BridgeConfig::default();
        let err = config
            .apply_env(env(&[("HEARTBEAT_INTERVAL", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "HEARTBEAT_INTERVAL", .. }));

        let err = config
            .apply_env(env(&[("ENABLE_REVERSE_CONNECTION", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("ENABLE_REVERSE_CONNECTION"));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = BridgeConfig::default();
        config.reverse.orchestrator_url = "localhost:8787".to_string();
        assert!(config.validate().is_err());
    }
}
