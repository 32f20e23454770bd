//! Protocol error types

use thiserror::Error;

/// Errors that can occur while interpreting protocol messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Method name outside the fixed method set
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Parameter missing from a dispatch request
    #[error("Missing required parameter: {0}")]
    MissingParam(&'static str),

    /// Parameter present but of the wrong shape
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParam { name: &'static str, reason: String },
}
