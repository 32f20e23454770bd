//! Deadline-scoped child process execution
//!
//! Each call to [`ProcessRunner::execute`] owns exactly one child process,
//! started in its own process group so the whole tree can be signalled.
//!
//! # Escalation
//!
//! ```text
//! running ──deadline──▶ SIGTERM to group ──grace period──▶ SIGKILL to group
//!    │                        │
//!    └─exit─▶ done            └─exit─▶ done (timed out)
//! ```
//!
//! The group is also SIGKILLed when the child exits on its own (stragglers
//! would keep the output pipes open) and when the execution future is
//! dropped before completion.

use std::ffi::OsStr;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;

/// Exit code reported when the deadline expired
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Time between SIGTERM and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// How long output keeps being read once the child has exited
const OUTPUT_DRAIN_WINDOW: Duration = Duration::from_millis(250);

const READ_CHUNK_SIZE: usize = 8192;

/// Result of one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    /// Everything the child wrote to stdout
    pub stdout: String,
    /// Everything the child wrote to stderr, plus the timeout marker if any
    pub stderr: String,
    /// Real exit code, `128 + signal` for signal deaths, or
    /// [`TIMEOUT_EXIT_CODE`] when the deadline expired
    pub exit_code: i32,
    /// Whether the deadline expired
    pub timed_out: bool,
}

impl ExecutionOutcome {
    /// Exited with status 0 before the deadline
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// stdout followed by stderr, separated by a newline when both are present
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) if self.stdout.ends_with('\n') => {
                format!("{}{}", self.stdout, self.stderr)
            }
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Runs external commands under a deadline
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    grace_period: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    /// Runner with the default grace period
    pub fn new() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Runner with a custom SIGTERM → SIGKILL grace period
    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Run `command` with `args` and wait at most `timeout`
    ///
    /// stdin is `/dev/null`. `env` is added on top of the inherited
    /// environment. A deadline expiry is reported through the outcome, not
    /// as an error.
    pub async fn execute<I, S>(
        &self,
        command: &str,
        args: I,
        timeout: Duration,
        env: &[(String, String)],
    ) -> Result<ExecutionOutcome, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if timeout.is_zero() {
            return Err(ExecError::InvalidTimeout);
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| ExecError::spawn(command, e))?;
        let pid = child.id();
        let mut group = ProcessGroupGuard::new(pid);
        tracing::debug!(command, pid, ?timeout, "Spawned child process");

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let exited = CancellationToken::new();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let supervise = async {
            let result = self.supervise(&mut child, pid, timeout).await;
            group.kill();
            exited.cancel();
            result
        };
        let (result, (), ()) = tokio::join!(
            supervise,
            drain(stdout_pipe, &mut stdout, &exited),
            drain(stderr_pipe, &mut stderr, &exited),
        );
        let (status, timed_out) = result.map_err(|source| ExecError::Wait {
            command: command.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&stderr).into_owned();
        let exit_code = if timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&timeout_marker(timeout));
            TIMEOUT_EXIT_CODE
        } else {
            exit_code_of(status)
        };

        tracing::debug!(
            command,
            pid,
            exit_code,
            timed_out,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Child process finished"
        );

        Ok(ExecutionOutcome {
            stdout,
            stderr,
            exit_code,
            timed_out,
        })
    }

    /// Wait for the child, escalating once the deadline passes
    ///
    /// Returns the exit status and whether the deadline expired.
    async fn supervise(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        timeout: Duration,
    ) -> io::Result<(ExitStatus, bool)> {
        if let Ok(status) = tokio::time::timeout(timeout, child.wait()).await {
            return Ok((status?, false));
        }

        tracing::warn!(pid, ?timeout, "Process exceeded its deadline, sending SIGTERM");
        signal_group(pid, GroupSignal::Terminate);

        if let Ok(status) = tokio::time::timeout(self.grace_period, child.wait()).await {
            return Ok((status?, true));
        }

        tracing::warn!(
            pid,
            grace_period = ?self.grace_period,
            "Process survived SIGTERM, sending SIGKILL"
        );
        signal_group(pid, GroupSignal::Kill);
        if let Err(e) = child.start_kill() {
            tracing::debug!(pid, "start_kill after SIGKILL: {}", e);
        }
        Ok((child.wait().await?, true))
    }
}

/// Human-readable marker appended to stderr on deadline expiry
fn timeout_marker(timeout: Duration) -> String {
    format!("Process timed out after {}s", timeout.as_secs_f64())
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Read a pipe to EOF, or until shortly after the child exited
async fn drain<R>(pipe: Option<R>, buf: &mut Vec<u8>, exited: &CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut drain_deadline: Option<Instant> = None;

    loop {
        let read = match drain_deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, pipe.read(&mut chunk)).await {
                    Ok(read) => read,
                    Err(_) => break,
                }
            }
            None => tokio::select! {
                read = pipe.read(&mut chunk) => read,
                _ = exited.cancelled() => {
                    drain_deadline = Some(Instant::now() + OUTPUT_DRAIN_WINDOW);
                    continue;
                }
            },
        };

        match read {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                tracing::debug!("Output pipe read failed: {}", e);
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// SIGKILLs the child's process group when dropped, unless already killed
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// Kill the group now and disarm, so a recycled pgid is never signalled
    fn kill(&mut self) {
        signal_group(self.pgid.take(), GroupSignal::Kill);
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn signal_group(pgid: Option<u32>, signal: GroupSignal) {
    let Some(pgid) = pgid else {
        return;
    };
    let signo = match signal {
        GroupSignal::Terminate => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };
    // ESRCH means the group is already gone
    unsafe {
        if libc::killpg(pgid as libc::pid_t, signo) != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::debug!(pgid, ?signal, "killpg failed: {}", err);
            }
        }
    }
}

// Without process groups the child is killed through `start_kill` and
// `kill_on_drop` instead.
#[cfg(not(unix))]
fn signal_group(_pgid: Option<u32>, _signal: GroupSignal) {}
