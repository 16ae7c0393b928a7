//! Supervisor actor - runs poll cycles and owns the reconciler.
//!
//! The actor is the single mutation context for reconciler state. Exit
//! deliveries, consumer commands, and poll ticks all arrive through the
//! same `select!` loop, so the two producers described in the
//! concurrency model never touch the reconciler concurrently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, trace, warn};
use tokio_util::sync::CancellationToken;

use vigil_core::{
    group_by_working_directory, CrashReconciler, GlobMatcher, ProcessGroup, WatchPattern,
    WatchedProcess,
};

use crate::exit_events::{ExitEvent, ExitWatch, WatchOutcome};
use crate::patterns::PatternStore;
use crate::snapshot::SnapshotSource;

use super::commands::{SupervisorCommand, SupervisorError, WatchEvent, WatchSnapshot};

/// Default time between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Supervisor Options
// ============================================================================

/// Construction-time wiring for the supervisor.
///
/// Everything the actor depends on is passed in explicitly, so tests can
/// drive it with scripted snapshot and exit-watch fakes.
pub struct SupervisorOptions {
    /// Time between poll cycles
    pub poll_interval: Duration,
    /// Initial watch patterns
    pub patterns: Vec<WatchPattern>,
    /// Store consulted by pattern reloads, if any
    pub pattern_store: Option<PatternStore>,
    /// Source of process-table snapshots
    pub snapshot_source: Arc<dyn SnapshotSource>,
    /// Kernel exit-watch registration, absent in poll-only mode
    pub exit_watch: Option<Arc<dyn ExitWatch>>,
}

// ============================================================================
// Supervisor Actor
// ============================================================================

/// The supervisor actor - owns the reconciler, matcher, and patterns.
pub struct Supervisor {
    patterns: Vec<WatchPattern>,
    pattern_store: Option<PatternStore>,
    matcher: GlobMatcher,
    reconciler: CrashReconciler,
    snapshot_source: Arc<dyn SnapshotSource>,
    exit_watch: Option<Arc<dyn ExitWatch>>,
    poll_interval: Duration,

    /// Groups from the most recent cycle, for reads and group kills
    last_groups: Vec<ProcessGroup>,

    /// Event publisher for subscribed consumers
    event_publisher: broadcast::Sender<WatchEvent>,
}

impl Supervisor {
    /// Creates the actor. Call [`run`](Self::run) in a spawned task.
    pub fn new(options: SupervisorOptions, event_publisher: broadcast::Sender<WatchEvent>) -> Self {
        Self {
            patterns: options.patterns,
            pattern_store: options.pattern_store,
            matcher: GlobMatcher::new(),
            reconciler: CrashReconciler::new(),
            snapshot_source: options.snapshot_source,
            exit_watch: options.exit_watch,
            poll_interval: options.poll_interval,
            last_groups: Vec::new(),
            event_publisher,
        }
    }

    /// Runs the supervision loop until cancelled.
    ///
    /// One immediate poll establishes the baseline, then cycles run at
    /// the configured interval, interleaved with exit deliveries and
    /// consumer commands.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SupervisorCommand>,
        mut exit_events: mpsc::UnboundedReceiver<ExitEvent>,
        cancel: CancellationToken,
    ) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            patterns = self.patterns.len(),
            event_coverage = self.exit_watch.is_some(),
            "Supervision loop starting"
        );

        self.poll().await;

        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break;
                }

                Some(event) = exit_events.recv() => {
                    self.handle_exit_event(event);
                }

                Some(command) = commands.recv() => {
                    self.handle_command(command).await;
                }

                _ = ticker.tick() => {
                    self.poll().await;
                }
            }
        }

        info!(
            tracked = self.reconciler.tracked_count(),
            missing = self.reconciler.missing_count(),
            "Supervision loop stopped"
        );
    }

    // ========================================================================
    // Poll Cycle
    // ========================================================================

    /// Runs one cycle: snapshot, filter, register, reconcile, publish.
    async fn poll(&mut self) {
        let source = Arc::clone(&self.snapshot_source);
        let processes = match tokio::task::spawn_blocking(move || source.snapshot()).await {
            Ok(processes) => processes,
            Err(error) => {
                warn!(%error, "Snapshot task panicked, skipping cycle");
                return;
            }
        };

        let total = processes.len();
        let matched: Vec<WatchedProcess> = processes
            .into_iter()
            .filter(|p| self.matcher.matches_any(&p.command_line, &self.patterns))
            .collect();
        trace!(total, matched = matched.len(), "Snapshot filtered");

        self.register_watches(&matched);

        let newly_missing = self.reconciler.update(&matched);
        for record in &newly_missing {
            warn!(
                pid = record.pid,
                name = %record.name,
                working_directory = %record.working_directory,
                "Watched process disappeared without an observed exit"
            );
            self.publish(WatchEvent::ProcessVanished {
                record: record.clone(),
            });
        }

        self.last_groups = group_by_working_directory(&matched);

        self.publish(WatchEvent::Snapshot {
            snapshot: Box::new(WatchSnapshot {
                groups: self.last_groups.clone(),
                missing: self.reconciler.missing().to_vec(),
                has_crashes: self.reconciler.has_missing(),
                matched_count: matched.len(),
            }),
        });
    }

    /// Registers exit watches for matched pids that lack one.
    fn register_watches(&mut self, matched: &[WatchedProcess]) {
        let Some(watcher) = &self.exit_watch else {
            return;
        };

        for process in matched {
            if watcher.is_watching(process.pid) {
                continue;
            }
            match watcher.watch(process.pid) {
                WatchOutcome::Registered => {
                    trace!(pid = process.pid, "Exit watch registered");
                    self.reconciler.mark_registered(process.pid);
                }
                WatchOutcome::AlreadyExited => {
                    debug!(pid = process.pid, "Process exited before registration");
                    self.reconciler.record_unobserved_exit(process.pid);
                }
                WatchOutcome::Failed(error) => {
                    warn!(
                        pid = process.pid,
                        %error,
                        "Exit watch registration failed, poll detection still covers it"
                    );
                }
            }
        }
    }

    // ========================================================================
    // Exit Deliveries
    // ========================================================================

    /// Records one delivered exit; publishes a crash when it is one.
    fn handle_exit_event(&mut self, event: ExitEvent) {
        let ExitEvent { pid, reason } = event;

        match self.reconciler.record_exit(pid, reason.clone()) {
            Some(record) => {
                warn!(pid, %reason, name = %record.name, "Watched process crashed");
                self.publish(WatchEvent::CrashDetected { record });
            }
            None => {
                debug!(pid, %reason, "Exit recorded");
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Dispatches a consumer command.
    async fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::PollNow { respond_to } => {
                self.poll().await;
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(());
            }
            SupervisorCommand::GetGroups { respond_to } => {
                let _ = respond_to.send(self.last_groups.clone());
            }
            SupervisorCommand::GetMissing { respond_to } => {
                let _ = respond_to.send(self.reconciler.missing().to_vec());
            }
            SupervisorCommand::Acknowledge { pid, respond_to } => {
                self.reconciler.acknowledge(pid);
                debug!(pid, remaining = self.reconciler.missing_count(), "Acknowledged");
                let _ = respond_to.send(());
            }
            SupervisorCommand::AcknowledgeAll { respond_to } => {
                self.reconciler.acknowledge_all();
                debug!("All missing records acknowledged");
                let _ = respond_to.send(());
            }
            SupervisorCommand::KillGroup {
                working_directory,
                respond_to,
            } => {
                let result = self.handle_kill_group(&working_directory).await;
                let _ = respond_to.send(result);
            }
            SupervisorCommand::ReloadPatterns { respond_to } => {
                let _ = respond_to.send(self.handle_reload_patterns());
            }
        }
    }

    /// Terminates a group: suppress, signal, then re-poll immediately.
    async fn handle_kill_group(
        &mut self,
        working_directory: &str,
    ) -> Result<usize, SupervisorError> {
        let pids: Vec<u32> = self
            .last_groups
            .iter()
            .find(|group| group.working_directory == working_directory)
            .map(|group| group.processes.iter().map(|p| p.pid).collect())
            .ok_or_else(|| SupervisorError::UnknownGroup(working_directory.to_string()))?;

        info!(
            working_directory,
            count = pids.len(),
            "Terminating process group"
        );

        // Suppress first so a fast death inside the immediate poll below
        // is already expected. The exit watch stays registered: the
        // SIGTERM delivery is not crash-class and absorbs slower deaths.
        self.reconciler.suppress(pids.iter().copied());

        for &pid in &pids {
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                debug!(
                    pid,
                    error = %std::io::Error::last_os_error(),
                    "Failed to signal process"
                );
            }
        }

        self.poll().await;

        Ok(pids.len())
    }

    /// Re-reads the pattern store, if one was wired in.
    fn handle_reload_patterns(&mut self) -> usize {
        if let Some(store) = &self.pattern_store {
            let patterns = store.load();
            info!(count = patterns.len(), "Watch patterns reloaded");
            self.matcher.clear_cache();
            self.patterns = patterns;
        }
        self.patterns.len()
    }

    /// Publishes an event, ignoring the no-subscribers case.
    fn publish(&self, event: WatchEvent) {
        let _ = self.event_publisher.send(event);
    }
}
