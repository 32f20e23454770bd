//! bpftrace front-end
//!
//! Wraps the tracing tool behind a [`ToolCommand`] so the same code path
//! serves plain invocations, `sudo -n` invocations, and wrapper scripts.

use std::time::Duration;

use cb_core::config::TraceConfig;

use crate::error::ExecError;
use crate::runner::{ExecutionOutcome, ProcessRunner};
use crate::validator::ScriptValidator;

/// Deadline for `--version` checks
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A tool executable plus arguments that precede every invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    leading_args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments inserted before the per-call arguments
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Program and full argument list for one call
    ///
    /// With `sudo` the tool runs as `sudo -n <program> ...`, which fails
    /// instead of prompting when no cached credentials exist.
    pub fn invocation(&self, sudo: bool, args: &[&str]) -> (String, Vec<String>) {
        let tail = self
            .leading_args
            .iter()
            .cloned()
            .chain(args.iter().map(|a| a.to_string()));

        if sudo {
            let argv = ["-n".to_string(), self.program.clone()]
                .into_iter()
                .chain(tail)
                .collect();
            ("sudo".to_string(), argv)
        } else {
            (self.program.clone(), tail.collect())
        }
    }
}

/// Runs trace scripts with the configured tool
#[derive(Debug, Clone)]
pub struct TraceExecutor {
    runner: ProcessRunner,
    tool: ToolCommand,
    default_timeout: Duration,
    use_sudo: bool,
}

impl TraceExecutor {
    pub fn new(tool: ToolCommand, default_timeout: Duration, use_sudo: bool) -> Self {
        Self {
            runner: ProcessRunner::new(),
            tool,
            default_timeout,
            use_sudo,
        }
    }

    pub fn from_config(config: &TraceConfig) -> Self {
        Self::new(
            ToolCommand::new(config.bpftrace_binary.clone()),
            config.default_timeout,
            config.use_sudo,
        )
    }

    /// Replace the process runner (e.g. to shorten the grace period)
    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Validator sharing this executor's tool and privilege settings
    pub fn validator(&self) -> ScriptValidator {
        ScriptValidator::new(self.tool.clone(), self.use_sudo).with_runner(self.runner.clone())
    }

    /// Whether the tool answers a version query
    pub async fn is_available(&self) -> bool {
        matches!(self.run_version().await, Some(outcome) if outcome.success())
    }

    /// The version the tool reports, e.g. `v0.20.2`
    pub async fn get_version(&self) -> Option<String> {
        let outcome = self.run_version().await?;
        if !outcome.success() {
            return None;
        }
        parse_version(&outcome.stdout).or_else(|| parse_version(&outcome.stderr))
    }

    async fn run_version(&self) -> Option<ExecutionOutcome> {
        let (program, args) = self.tool.invocation(false, &["--version"]);
        match self
            .runner
            .execute(&program, &args, VERSION_PROBE_TIMEOUT, &[])
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::debug!("{} --version failed: {}", program, e);
                None
            }
        }
    }

    /// Run `script` with `-e`, bounded by `timeout`
    ///
    /// `None` arguments fall back to the executor defaults.
    pub async fn execute_script(
        &self,
        script: &str,
        timeout: Option<Duration>,
        use_sudo: Option<bool>,
    ) -> Result<ExecutionOutcome, ExecError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let sudo = use_sudo.unwrap_or(self.use_sudo);
        let (program, args) = self.tool.invocation(sudo, &["-e", script]);

        tracing::info!(
            program = %program,
            ?timeout,
            sudo,
            script_bytes = script.len(),
            "Running trace script"
        );
        let outcome = self.runner.execute(&program, &args, timeout, &[]).await?;
        if outcome.timed_out {
            tracing::info!("Trace script stopped at its deadline");
        } else if !outcome.success() {
            tracing::warn!(exit_code = outcome.exit_code, "Trace script failed");
        }
        Ok(outcome)
    }
}

/// Extract the version from `--version` output
///
/// Accepts `bpftrace v0.20.2` as well as a bare `v0.20.2`; the result must
/// contain a digit.
fn parse_version(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let version = line
        .split_whitespace()
        .find(|token| token.chars().any(|c| c.is_ascii_digit()))?;
    Some(version.to_string())
}
