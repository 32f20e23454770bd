//! Trace script validation via the tool's dry-run mode

use std::time::Duration;

use serde::Serialize;

use crate::runner::ProcessRunner;
use crate::trace::ToolCommand;

/// Deadline for a dry run
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Verdict on a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptValidation {
    pub is_valid: bool,
    /// Tool diagnostic when the script was rejected
    pub error: Option<String>,
}

impl ScriptValidation {
    fn valid() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
        }
    }
}

/// Checks scripts with `--dry-run`, which parses and loads the program
/// without running its actions
#[derive(Debug, Clone)]
pub struct ScriptValidator {
    runner: ProcessRunner,
    tool: ToolCommand,
    use_sudo: bool,
}

impl ScriptValidator {
    pub fn new(tool: ToolCommand, use_sudo: bool) -> Self {
        Self {
            runner: ProcessRunner::new(),
            tool,
            use_sudo,
        }
    }

    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    pub async fn validate(&self, script: &str) -> ScriptValidation {
        if script.trim().is_empty() {
            return ScriptValidation::invalid("Script is empty");
        }

        let (program, args) = self.tool.invocation(self.use_sudo, &["--dry-run", "-e", script]);
        let outcome = match self
            .runner
            .execute(&program, &args, VALIDATION_TIMEOUT, &[])
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return ScriptValidation::invalid(format!("Could not run validator: {}", e)),
        };

        if outcome.timed_out {
            return ScriptValidation::invalid(format!(
                "Validation timed out after {}s",
                VALIDATION_TIMEOUT.as_secs()
            ));
        }

        let diagnostic = outcome.stderr.trim();
        if outcome.exit_code != 0 || diagnostic.contains("ERROR") {
            let message = if !diagnostic.is_empty() {
                diagnostic.to_string()
            } else if !outcome.stdout.trim().is_empty() {
                outcome.stdout.trim().to_string()
            } else {
                format!("Validator exited with code {}", outcome.exit_code)
            };
            tracing::debug!(exit_code = outcome.exit_code, "Script rejected: {}", message);
            return ScriptValidation::invalid(message);
        }

        ScriptValidation::valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_script_rejected_without_running_tool() {
        let validator = ScriptValidator::new(ToolCommand::new("/nonexistent/cb-bpftrace"), false);
        let verdict = validator.validate("   ").await;
        assert!(!verdict.is_valid);
        assert_eq!(verdict.error.as_deref(), Some("Script is empty"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let validator = ScriptValidator::new(ToolCommand::new("/nonexistent/cb-bpftrace"), false);
        let verdict = validator.validate("BEGIN { exit(); }").await;
        assert!(!verdict.is_valid);
        assert!(verdict.error.unwrap().contains("Could not run validator"));
    }
}
