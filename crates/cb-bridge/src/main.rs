//! crash-bridge daemon
//!
//! Registers with a remote orchestrator, keeps the registration alive, and
//! serves the orchestrator's crash analysis calls. The `trace` subcommands
//! drive the trace tool directly from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cb_bridge::{server, AppState, CrashTools, MethodDispatcher, SessionConnector};
use cb_core::config::{self, BridgeConfig};
use cb_exec::TraceExecutor;

#[derive(Parser)]
#[command(name = "crash-bridge")]
#[command(about = "Crash analysis bridge for a remote orchestrator")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "CRASH_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long, global = true)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge daemon (default)
    Serve {
        /// Listen address for orchestrator calls (overrides config)
        #[arg(short, long)]
        listen: Option<String>,

        /// Serve calls without registering with the orchestrator
        #[arg(long)]
        no_reverse: bool,
    },

    /// Trace tool utilities
    Trace {
        #[command(subcommand)]
        action: TraceAction,
    },
}

#[derive(Subcommand)]
enum TraceAction {
    /// Run a trace script until it exits or the timeout expires
    Run {
        #[command(flatten)]
        script: ScriptArgs,

        /// Timeout in seconds (defaults to the configured value)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Run the tool through `sudo -n`
        #[arg(long)]
        sudo: bool,
    },

    /// Check a trace script with the tool's dry-run mode
    Validate {
        #[command(flatten)]
        script: ScriptArgs,
    },

    /// Print the trace tool version
    Version,
}

#[derive(clap::Args)]
struct ScriptArgs {
    /// Inline script text
    #[arg(required_unless_present = "file")]
    script: Option<String>,

    /// Read the script from a file
    #[arg(short = 'F', long, conflicts_with = "script")]
    file: Option<PathBuf>,
}

impl ScriptArgs {
    fn load(&self) -> Result<String> {
        match (&self.script, &self.file) {
            (Some(script), _) => Ok(script.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read script from {:?}", path)),
            (None, None) => anyhow::bail!("No script given"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_bridge_config(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Serve {
        listen: None,
        no_reverse: false,
    }) {
        Command::Serve { listen, no_reverse } => serve(config, listen, no_reverse).await,
        Command::Trace { action } => run_trace(&config, action).await,
    }
}

/// File (explicit, then default path), then environment overrides
fn load_bridge_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let mut config = if let Some(config_path) = path {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                BridgeConfig::default()
            })
        } else {
            tracing::debug!("Using default configuration");
            BridgeConfig::default()
        }
    };

    config
        .apply_process_env()
        .context("Invalid environment override")?;
    config.validate()?;
    Ok(config)
}

async fn serve(mut config: BridgeConfig, listen: Option<String>, no_reverse: bool) -> Result<()> {
    tracing::info!("crash-bridge {} starting...", env!("CARGO_PKG_VERSION"));

    if let Some(listen) = listen {
        config.listen_address = listen;
    }
    if no_reverse {
        config.reverse.enabled = false;
    }

    let handlers = Arc::new(CrashTools::new(config.crash.clone()));
    let dispatcher = Arc::new(MethodDispatcher::new(handlers));
    let mut connector = SessionConnector::new(config.reverse.clone(), Arc::clone(&dispatcher));
    let state = AppState::new(dispatcher, connector.subscribe());

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_address))?;
    tracing::info!(
        "Accepting orchestrator calls on {}",
        listener.local_addr()?
    );

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    let server = tokio::spawn(server::serve(listener, state, cancel.clone()));

    // Registration is abandoned if shutdown arrives first
    tokio::select! {
        _ = connector.start() => {}
        _ = cancel.cancelled() => {}
    }

    // Returns once a signal cancels the token and in-flight calls drain
    let served = server.await;
    connector.stop().await;

    served
        .context("Endpoint task failed")?
        .context("Endpoint terminated with error")?;
    tracing::info!("crash-bridge shutdown complete");
    Ok(())
}

async fn watch_signals(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cancel.cancel();
}

async fn run_trace(config: &BridgeConfig, action: TraceAction) -> Result<()> {
    let executor = TraceExecutor::from_config(&config.trace);

    match action {
        TraceAction::Run {
            script,
            timeout,
            sudo,
        } => {
            let script = script.load()?;
            let outcome = executor
                .execute_script(
                    &script,
                    timeout.map(Duration::from_secs),
                    sudo.then_some(true),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success() {
                std::process::exit(outcome.exit_code);
            }
        }
        TraceAction::Validate { script } => {
            let verdict = executor.validator().validate(&script.load()?).await;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if !verdict.is_valid {
                std::process::exit(1);
            }
        }
        TraceAction::Version => match executor.get_version().await {
            Some(version) => println!("{}", version),
            None => anyhow::bail!(
                "{} is not available",
                config.trace.bpftrace_binary
            ),
        },
    }

    Ok(())
}
