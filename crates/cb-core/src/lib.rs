//! cb-core: Configuration and shared errors for crash-bridge
//!
//! This crate holds the configuration structures consumed by the
//! connector, the HTTP endpoint, and the process execution layer.

pub mod config;
pub mod error;

pub use config::{BridgeConfig, CrashConfig, ReverseConnectionConfig, TraceConfig};
pub use error::ConfigError;
