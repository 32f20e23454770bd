//! Inbound method dispatch envelope
//!
//! The orchestrator invokes the bridge with `{method, params}` and always
//! gets back `{success, data?, error?}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Parameters of a dispatched call
pub type Params = Map<String, Value>;

/// The fixed set of methods the orchestrator may invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Run a command inside the active crash session
    CrashCommand,
    /// Describe the active crash session
    GetCrashInfo,
    /// List available crash dumps
    ListCrashDumps,
    /// Open a crash session on a dump
    StartCrashSession,
    /// Close the active crash session
    CloseCrashSession,
}

impl Method {
    /// Every method, in registration order
    pub const ALL: [Method; 5] = [
        Method::CrashCommand,
        Method::GetCrashInfo,
        Method::ListCrashDumps,
        Method::StartCrashSession,
        Method::CloseCrashSession,
    ];

    /// Wire name of the method
    pub fn name(&self) -> &'static str {
        match self {
            Method::CrashCommand => "crash_command",
            Method::GetCrashInfo => "get_crash_info",
            Method::ListCrashDumps => "list_crash_dumps",
            Method::StartCrashSession => "start_crash_session",
            Method::CloseCrashSession => "close_crash_session",
        }
    }

    /// Look a method up by its exact wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ProtocolError::UnknownMethod(s.to_string()))
    }
}

/// A method call received from the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Method name (not yet validated against [`Method`])
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Params,
}

/// Outcome of one dispatched call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Handler completed; `data` is its textual payload
    Success { data: String },
    /// Handler could not complete
    Failure { error: String },
}

impl DispatchResult {
    pub fn success(data: impl Into<String>) -> Self {
        Self::Success { data: data.into() }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// JSON body returned to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DispatchResult> for DispatchResponse {
    fn from(result: DispatchResult) -> Self {
        match result {
            DispatchResult::Success { data } => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            DispatchResult::Failure { error } => Self {
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

/// Typed accessors over [`Params`]
pub trait ParamsExt {
    /// Optional string parameter; present-but-not-a-string is an error
    fn opt_str(&self, name: &'static str) -> Result<Option<&str>, ProtocolError>;

    /// Required, non-empty string parameter
    fn require_str(&self, name: &'static str) -> Result<&str, ProtocolError>;

    /// Optional non-negative integer parameter
    fn opt_u64(&self, name: &'static str) -> Result<Option<u64>, ProtocolError>;
}

impl ParamsExt for Params {
    fn opt_str(&self, name: &'static str) -> Result<Option<&str>, ProtocolError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(ProtocolError::InvalidParam {
                name,
                reason: format!("expected a string, got {}", other),
            }),
        }
    }

    fn require_str(&self, name: &'static str) -> Result<&str, ProtocolError> {
        match self.opt_str(name)? {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(ProtocolError::MissingParam(name)),
        }
    }

    fn opt_u64(&self, name: &'static str) -> Result<Option<u64>, ProtocolError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| ProtocolError::InvalidParam {
                    name,
                    reason: format!("expected a non-negative integer, got {}", value),
                }),
        }
    }
}
