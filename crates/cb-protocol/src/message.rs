//! Outbound messages for the orchestrator registry
//!
//! The bridge registers itself once per session and then keeps the
//! registration alive with periodic heartbeats:
//!
//! 1. `POST {base}/api/mcp/connect` with a [`RegisterRequest`]
//! 2. Orchestrator answers `200` with a [`RegisterResponse`] carrying the server id
//! 3. `POST {base}/api/mcp/registry/heartbeat` with a [`HeartbeatRequest`] every interval
//!
//! The orchestrator calls back into the bridge on [`REQUEST_PATH`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::Method;

/// Registration endpoint, relative to the orchestrator base URL
pub const CONNECT_PATH: &str = "/api/mcp/connect";

/// Heartbeat endpoint, relative to the orchestrator base URL
pub const HEARTBEAT_PATH: &str = "/api/mcp/registry/heartbeat";

/// Inbound dispatch endpoint served by the bridge
pub const REQUEST_PATH: &str = "/api/mcp/request";

/// Server type advertised during registration
pub const SERVER_TYPE: &str = "crash_analysis";

/// Registration body sent to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Server name shown by the orchestrator
    pub name: String,
    /// Server category
    #[serde(rename = "type")]
    pub server_type: String,
    /// Bridge version
    pub version: String,
    /// Method names this bridge accepts
    pub capabilities: Vec<String>,
}

impl RegisterRequest {
    /// Build a registration advertising the full fixed method set
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_type: SERVER_TYPE.to_string(),
            version: version.into(),
            capabilities: Method::ALL.iter().map(|m| m.name().to_string()).collect(),
        }
    }
}

/// Opaque server identifier assigned by the orchestrator
///
/// Held in the JSON form it arrived in, so heartbeats echo a numeric id as a
/// number and a string id as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(Value);

impl ServerId {
    /// Accepts a non-empty string or a number
    pub fn from_value(value: Value) -> Option<Self> {
        match &value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(value)),
            Value::Number(_) => Some(Self(value)),
            _ => None,
        }
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(Value::String(id.to_string()))
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

/// Registration answer; only the identifier is interpreted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Raw `id` field, whatever JSON type the orchestrator chose
    #[serde(default)]
    pub id: Option<Value>,
}

impl RegisterResponse {
    /// The usable server id; null, empty and non-scalar ids yield `None`
    pub fn server_id(&self) -> Option<ServerId> {
        self.id.clone().and_then(ServerId::from_value)
    }
}

/// Heartbeat body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    /// Identifier obtained at registration
    pub server_id: ServerId,
}
