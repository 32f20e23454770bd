//! Execution errors

use std::io;
use thiserror::Error;

/// Errors that prevent an execution from producing an outcome
///
/// A timeout is not an error: it yields an outcome with
/// [`TIMEOUT_EXIT_CODE`](crate::TIMEOUT_EXIT_CODE).
#[derive(Error, Debug)]
pub enum ExecError {
    /// Zero deadline
    #[error("Timeout must be greater than zero")]
    InvalidTimeout,

    /// The executable could not be found
    #[error("Executable not found: {0}")]
    NotFound(String),

    /// The process could not be started
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on the child failed
    #[error("Failed to wait for {command}: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    pub(crate) fn spawn(command: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            ExecError::NotFound(command.to_string())
        } else {
            ExecError::Spawn {
                command: command.to_string(),
                source,
            }
        }
    }
}
