//! Vigil daemon - watches glob-matched processes and reports crashes.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! vigild start
//!
//! # Start the daemon (background/daemonized)
//! vigild start -d
//!
//! # Poll every 10 seconds instead of the default 5
//! vigild start --interval 10
//!
//! # Stop the daemon
//! vigild stop
//!
//! # Check daemon status
//! vigild status
//!
//! # Manage watch patterns
//! vigild patterns list
//! vigild patterns add '*cargo*watch*'
//!
//! # Enable debug logging
//! RUST_LOG=vigild=debug vigild start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: graceful shutdown
//! - SIGHUP: reload watch patterns

use std::fs::{self, File};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use vigild::exit_events::{ExitWatch, NetlinkExitMonitor};
use vigild::metrics::spawn_self_monitor;
use vigild::patterns::PatternStore;
use vigild::snapshot::ProcfsSnapshotSource;
use vigild::supervisor::{
    spawn_supervisor, SupervisorHandle, SupervisorOptions, DEFAULT_POLL_INTERVAL,
};

/// Vigil daemon - process supervision and crash reporting
#[derive(Parser, Debug)]
#[command(name = "vigild", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Seconds between poll cycles
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
        interval: u64,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
    /// Manage watch patterns
    Patterns {
        #[command(subcommand)]
        action: PatternAction,
    },
}

#[derive(Subcommand, Debug)]
enum PatternAction {
    /// List stored patterns
    List,
    /// Add a glob pattern
    Add {
        /// Pattern text, e.g. '*gulp*watch-client*'
        pattern: String,
    },
    /// Remove a pattern by id
    Remove {
        /// Pattern id as shown by `patterns list`
        id: Uuid,
    },
    /// Enable a pattern by id
    Enable {
        /// Pattern id as shown by `patterns list`
        id: Uuid,
    },
    /// Disable a pattern by id (kept but never matched)
    Disable {
        /// Pattern id as shown by `patterns list`
        id: Uuid,
    },
    /// Replace stored patterns with the defaults
    Reset,
}

// ============================================================================
// PID File Handling
// ============================================================================

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vigil")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("vigild.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("vigild.log")
}

fn read_pid() -> Option<u32> {
    let contents = fs::read_to_string(pid_file_path()).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    fs::write(&path, process::id().to_string()).context("Failed to write PID file")
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

// ============================================================================
// Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        interval: DEFAULT_POLL_INTERVAL.as_secs(),
    });

    match command {
        Command::Start { daemon, interval } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'vigild stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(Duration::from_secs(interval.max(1)));

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                println!("Patterns: {}", PatternStore::default_path().display());
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
        Command::Patterns { action } => handle_patterns(action),
    }
}

// ============================================================================
// Pattern Subcommands
// ============================================================================

fn handle_patterns(action: PatternAction) -> Result<()> {
    let store = PatternStore::new(PatternStore::default_path());

    match action {
        PatternAction::List => {
            for pattern in store.load() {
                let flag = if pattern.enabled { "enabled " } else { "disabled" };
                println!("{}  {}  {}", pattern.id, flag, pattern.pattern);
            }
        }
        PatternAction::Add { pattern } => {
            let added = store.add(&pattern).context("Failed to add pattern")?;
            println!("Added {} ({})", added.pattern, added.id);
        }
        PatternAction::Remove { id } => {
            store.remove(id).context("Failed to remove pattern")?;
            println!("Removed {id}");
        }
        PatternAction::Enable { id } => {
            store
                .set_enabled(id, true)
                .context("Failed to enable pattern")?;
            println!("Enabled {id}");
        }
        PatternAction::Disable { id } => {
            store
                .set_enabled(id, false)
                .context("Failed to disable pattern")?;
            println!("Disabled {id}");
        }
        PatternAction::Reset => {
            let defaults = store.reset().context("Failed to reset patterns")?;
            println!("Reset to {} default patterns", defaults.len());
        }
    }

    if is_daemon_running().is_some() {
        println!("Note: signal the daemon with SIGHUP to pick up changes.");
    }

    Ok(())
}

// ============================================================================
// Daemonization
// ============================================================================

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

// ============================================================================
// Daemon Runtime
// ============================================================================

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(poll_interval: Duration) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("vigild=info".parse()?)
                .add_directive("vigil_core=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Vigil daemon starting"
    );

    let cancel = CancellationToken::new();

    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Pattern storage
    let store = PatternStore::new(PatternStore::default_path());
    let patterns = store.load();
    info!(
        count = patterns.len(),
        path = %store.path().display(),
        "Watch patterns loaded"
    );

    // Kernel exit events; fall back to poll-only when unavailable
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    let exit_watch: Option<Arc<dyn ExitWatch>> = match NetlinkExitMonitor::spawn(exit_tx) {
        Ok(monitor) => {
            info!("Kernel exit events enabled");
            Some(Arc::new(monitor))
        }
        Err(error) => {
            warn!(
                %error,
                "Kernel exit events unavailable (needs CAP_NET_ADMIN), relying on poll detection"
            );
            None
        }
    };

    let supervisor = spawn_supervisor(
        SupervisorOptions {
            poll_interval,
            patterns,
            pattern_store: Some(store),
            snapshot_source: Arc::new(ProcfsSnapshotSource::new()),
            exit_watch,
        },
        exit_rx,
        cancel.clone(),
    );
    info!("Supervision loop started");

    let _metrics_handle = spawn_self_monitor(cancel.clone());

    spawn_reload_task(supervisor.clone(), cancel.clone());

    cancel.cancelled().await;

    info!("Vigil daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm = signal(SignalKind::terminate());
    let sigint = signal(SignalKind::interrupt());

    match (sigterm, sigint) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        _ => {
            warn!("Failed to install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

/// Reloads watch patterns whenever SIGHUP arrives.
fn spawn_reload_task(supervisor: SupervisorHandle, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%error, "Failed to install SIGHUP handler, pattern reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                received = sighup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    let count = supervisor.reload_patterns().await;
                    info!(count, "Watch patterns reloaded on SIGHUP");
                }
            }
        }
    });
}
