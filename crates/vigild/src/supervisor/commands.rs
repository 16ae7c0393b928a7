//! Supervisor commands, errors, and published events.
//!
//! Commands carry a oneshot `respond_to` channel where the caller needs
//! an answer; events go out on a broadcast channel to every subscribed
//! consumer.

use thiserror::Error;
use tokio::sync::oneshot;

use vigil_core::{MissingProcessRecord, ProcessGroup};

// ============================================================================
// Supervisor Commands
// ============================================================================

/// Commands sent to the supervisor actor.
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Run a poll cycle immediately, outside the regular interval.
    PollNow {
        /// Completes when the cycle has finished
        respond_to: oneshot::Sender<()>,
    },

    /// Get the current working-directory groups of matched processes.
    GetGroups {
        /// Channel to send the groups
        respond_to: oneshot::Sender<Vec<ProcessGroup>>,
    },

    /// Get the unacknowledged missing-process records.
    GetMissing {
        /// Channel to send the records
        respond_to: oneshot::Sender<Vec<MissingProcessRecord>>,
    },

    /// Remove the missing record(s) for one pid. Unknown pids are a
    /// no-op.
    Acknowledge {
        /// The pid to acknowledge
        pid: u32,
        /// Completes when the record is gone
        respond_to: oneshot::Sender<()>,
    },

    /// Remove every missing record.
    AcknowledgeAll {
        /// Completes when the list is empty
        respond_to: oneshot::Sender<()>,
    },

    /// Terminate every process in a group.
    ///
    /// Suppresses the members so their disappearance is not reported,
    /// sends SIGTERM to each, then runs an immediate poll so consumers
    /// see the change without waiting a full interval.
    ///
    /// # Errors
    /// - `SupervisorError::UnknownGroup` if no group has that directory
    KillGroup {
        /// Working directory identifying the group
        working_directory: String,
        /// Channel to send how many processes were signalled
        respond_to: oneshot::Sender<Result<usize, SupervisorError>>,
    },

    /// Re-read the pattern store and match against the fresh set.
    ReloadPatterns {
        /// Channel to send the number of active patterns
        respond_to: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Supervisor Errors
// ============================================================================

/// Errors that can occur during supervisor operations.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    /// No process group exists for the given working directory.
    #[error("no process group for working directory: {0}")]
    UnknownGroup(String),

    /// The supervisor has shut down.
    #[error("supervisor channel closed")]
    ChannelClosed,
}

// ============================================================================
// Watch Events
// ============================================================================

/// The per-cycle view published to consumers.
#[derive(Debug, Clone, Default)]
pub struct WatchSnapshot {
    /// Matched processes grouped by working directory
    pub groups: Vec<ProcessGroup>,
    /// Unacknowledged missing records, oldest first
    pub missing: Vec<MissingProcessRecord>,
    /// True while any missing record is unacknowledged
    pub has_crashes: bool,
    /// Size of the flat matched set this cycle
    pub matched_count: usize,
}

/// Events published by the supervisor to subscribers.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A poll cycle completed.
    ///
    /// The snapshot is boxed to reduce enum size variance.
    Snapshot {
        /// The published view (boxed for size optimization)
        snapshot: Box<WatchSnapshot>,
    },

    /// A tracked process disappeared with no observed exit status.
    ProcessVanished {
        /// The record that was appended
        record: MissingProcessRecord,
    },

    /// The kernel event path delivered a crash-class exit.
    CrashDetected {
        /// The record that was appended, reason included
        record: MissingProcessRecord,
    },
}
