//! Crash dump analysis backend
//!
//! Dumps are plain files in the configured dump directory. A session pins
//! one dump (and optionally a kernel image); each `crash_command` runs the
//! `crash` utility in batch mode against the pinned dump through the
//! process runner, so a hung analysis is terminated at its deadline.

use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use cb_core::CrashConfig;
use cb_exec::ProcessRunner;
use cb_protocol::{HandlerOutput, Params, ParamsExt};

use crate::dispatcher::CrashHandlers;

/// Deadline for probing the `crash` binary
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A dump file found in the dump directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpEntry {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time, seconds since the UNIX epoch
    pub modified: u64,
}

#[derive(Debug, Clone, Serialize)]
struct CrashSession {
    dump_path: PathBuf,
    kernel_path: Option<PathBuf>,
    started_at: u64,
}

/// Default [`CrashHandlers`] implementation
pub struct CrashTools {
    config: CrashConfig,
    runner: ProcessRunner,
    session: Mutex<Option<CrashSession>>,
}

impl CrashTools {
    pub fn new(config: CrashConfig) -> Self {
        Self {
            config,
            runner: ProcessRunner::new(),
            session: Mutex::new(None),
        }
    }

    /// Dumps in the dump directory, newest first
    pub async fn find_dumps(&self) -> anyhow::Result<Vec<DumpEntry>> {
        scan_dump_dir(&self.config.dump_dir).await
    }

    /// Whether the `crash` binary can be started at all
    pub async fn crash_available(&self) -> bool {
        match self
            .runner
            .execute(&self.config.crash_binary, ["--version"], PROBE_TIMEOUT, &[])
            .await
        {
            Ok(outcome) => !outcome.timed_out,
            Err(e) => {
                tracing::debug!("crash binary unavailable: {}", e);
                false
            }
        }
    }

    async fn active_session(&self) -> Option<CrashSession> {
        self.session.lock().await.clone()
    }
}

#[async_trait]
impl CrashHandlers for CrashTools {
    async fn crash_command(&self, params: &Params) -> anyhow::Result<HandlerOutput> {
        let command = params.require_str("command")?.trim();
        if command.contains('\n') {
            bail!("crash_command accepts a single command per call");
        }
        let timeout = match params.opt_u64("timeout")? {
            Some(0) => bail!("timeout must be greater than zero"),
            Some(secs) => Duration::from_secs(secs),
            None => self.config.command_timeout,
        };

        let Some(session) = self.active_session().await else {
            bail!("No active crash session. Call start_crash_session first.");
        };

        let mut input = tempfile::Builder::new()
            .prefix("crash-bridge-")
            .suffix(".cmd")
            .tempfile()
            .context("Failed to create command file")?;
        writeln!(input, "{}", command)?;
        writeln!(input, "quit")?;
        input.flush()?;

        let mut args = vec![OsStr::new("-s")];
        if let Some(kernel) = &session.kernel_path {
            args.push(kernel.as_os_str());
        }
        args.push(session.dump_path.as_os_str());
        args.push(OsStr::new("-i"));
        args.push(input.path().as_os_str());

        tracing::debug!(
            dump = %session.dump_path.display(),
            "Running crash command {:?} (timeout {:?})",
            command,
            timeout
        );

        let outcome = self
            .runner
            .execute(&self.config.crash_binary, args, timeout, &[])
            .await
            .with_context(|| format!("Failed to run {}", self.config.crash_binary))?;

        if !outcome.timed_out && !outcome.success() {
            let detail = outcome.stderr.trim();
            bail!(
                "crash exited with code {}{}{}",
                outcome.exit_code,
                if detail.is_empty() { "" } else { ": " },
                detail
            );
        }

        Ok(HandlerOutput::text(outcome.combined_output()))
    }

    async fn get_crash_info(&self, _params: &Params) -> anyhow::Result<HandlerOutput> {
        let session = self.active_session().await;
        let info = json!({
            "session": {
                "is_active": session.is_some(),
                "dump_path": session.as_ref().map(|s| &s.dump_path),
                "kernel_path": session.as_ref().and_then(|s| s.kernel_path.as_ref()),
                "started_at": session.as_ref().map(|s| s.started_at),
            },
            "dump_dir": self.config.dump_dir,
            "crash_binary": self.config.crash_binary,
            "crash_available": self.crash_available().await,
        });
        Ok(HandlerOutput::json(info))
    }

    async fn list_crash_dumps(&self, params: &Params) -> anyhow::Result<HandlerOutput> {
        let limit = params
            .opt_u64("max_dumps")?
            .map(|n| n as usize)
            .unwrap_or(self.config.max_dumps);

        let dumps = self.find_dumps().await?;
        let total = dumps.len();
        let listed: Vec<_> = dumps.into_iter().take(limit).collect();

        Ok(HandlerOutput::json(json!({
            "dump_dir": self.config.dump_dir,
            "total": total,
            "dumps": listed,
        })))
    }

    async fn start_crash_session(&self, params: &Params) -> anyhow::Result<HandlerOutput> {
        let dump_path = match params.opt_str("dump_path")? {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => self
                .find_dumps()
                .await?
                .into_iter()
                .next()
                .map(|entry| entry.path)
                .with_context(|| {
                    format!("No crash dumps found in {}", self.config.dump_dir.display())
                })?,
        };
        require_file(&dump_path, "Crash dump").await?;

        let kernel_path = match params.opt_str("kernel_path")? {
            Some(path) if !path.trim().is_empty() => Some(PathBuf::from(path)),
            _ => self.config.kernel_path.clone(),
        };
        if let Some(kernel) = &kernel_path {
            require_file(kernel, "Kernel image").await?;
        }

        let message = format!(
            "Session started for {} (kernel: {})",
            dump_path.display(),
            kernel_path
                .as_ref()
                .map(|k| k.display().to_string())
                .unwrap_or_else(|| "auto".to_string())
        );

        let mut slot = self.session.lock().await;
        if let Some(previous) = slot.take() {
            tracing::info!(
                "Replacing crash session on {}",
                previous.dump_path.display()
            );
        }
        *slot = Some(CrashSession {
            dump_path,
            kernel_path,
            started_at: unix_secs(SystemTime::now()),
        });
        tracing::info!("{}", message);

        Ok(HandlerOutput::text(message))
    }

    async fn close_crash_session(&self, _params: &Params) -> anyhow::Result<HandlerOutput> {
        match self.session.lock().await.take() {
            Some(session) => {
                tracing::info!("Closed crash session on {}", session.dump_path.display());
                Ok(HandlerOutput::text("Session closed"))
            }
            None => Ok(HandlerOutput::text("No active session")),
        }
    }
}

async fn require_file(path: &Path, what: &str) -> anyhow::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => bail!("{} is not a regular file: {}", what, path.display()),
        Err(_) => bail!("{} not found: {}", what, path.display()),
    }
}

/// Regular files in `dir`, newest first, ties broken by path
async fn scan_dump_dir(dir: &Path) -> anyhow::Result<Vec<DumpEntry>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Cannot read dump directory {}", dir.display()))?;

    let mut dumps = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        dumps.push(DumpEntry {
            path: entry.path(),
            size: meta.len(),
            modified: meta.modified().map(unix_secs).unwrap_or(0),
        });
    }

    dumps.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    Ok(dumps)
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
