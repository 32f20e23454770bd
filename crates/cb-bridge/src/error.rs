//! Orchestrator registry errors

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a registration or heartbeat call
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Transport failure (connection refused, DNS, timeout, bad body)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The orchestrator answered with something other than 200
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    /// 200 without a usable server id
    #[error("registration response did not contain a server id")]
    MissingServerId,
}
