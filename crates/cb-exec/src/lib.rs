//! cb-exec: Supervised external process execution
//!
//! Runs analysis tools (`crash`, `bpftrace`) as child processes with a hard
//! deadline. On expiry the child's process group gets SIGTERM, then SIGKILL
//! after a grace period. Dropping an in-flight execution kills the group.

pub mod error;
pub mod runner;
pub mod trace;
pub mod validator;

pub use error::ExecError;
pub use runner::{ExecutionOutcome, ProcessRunner, DEFAULT_GRACE_PERIOD, TIMEOUT_EXIT_CODE};
pub use trace::{ToolCommand, TraceExecutor};
pub use validator::{ScriptValidation, ScriptValidator};
