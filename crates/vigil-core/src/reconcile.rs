//! Crash reconciliation - merges kernel exit events with poll snapshots.
//!
//! Two independently-arriving sources report on the same processes: the
//! kernel exit-event path delivers a decoded [`ExitReason`] once per
//! registered pid, and the periodic snapshot shows which pids are still
//! present. The reconciler owns the authoritative "previously seen,
//! still-matched" map and turns the two sources into a single
//! duplicate-free list of missing processes.
//!
//! All mutation must happen from a single context; the supervisor actor
//! confines every call to its own task.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::debug;

use crate::exit_reason::ExitReason;
use crate::process::{MissingProcessRecord, WatchedProcess};

// ============================================================================
// Watch State
// ============================================================================

/// Event-path bookkeeping for a tracked pid.
///
/// Absence from the state map means the pid has no event coverage
/// (unwatched). A delivered exit always replaces the registration, so a
/// pid never holds both.
#[derive(Debug, Clone, PartialEq)]
enum WatchState {
    /// A kernel exit watch is registered and presumed live.
    Registered,
    /// The event path delivered this exit status.
    Exited(ExitReason),
    /// The process was already gone when registration was attempted;
    /// the cause of death is unknowable.
    ExitedUnknown,
}

impl WatchState {
    fn is_exit(&self) -> bool {
        !matches!(self, Self::Registered)
    }
}

// ============================================================================
// Crash Reconciler
// ============================================================================

/// Owns the previous-snapshot map, per-pid watch states, and the
/// accumulating missing-process list.
///
/// Poll-fallback policy: a tracked pid that disappears with no event
/// coverage is reported as missing with an unknown cause, rather than
/// silently dropped.
#[derive(Debug, Default)]
pub struct CrashReconciler {
    /// Matched processes from the previous snapshot, keyed by pid
    previous: HashMap<u32, WatchedProcess>,

    /// Event-path bookkeeping, keyed by pid
    states: HashMap<u32, WatchState>,

    /// Pids whose disappearance the next update treats as expected.
    /// Consumed (cleared) by that update.
    suppressed: HashSet<u32>,

    /// Unacknowledged missing-process records, in detection order
    missing: Vec<MissingProcessRecord>,
}

impl CrashReconciler {
    /// Creates an empty reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an exit delivered by the kernel event path.
    ///
    /// Clears any registration mark for the pid. If the reason is
    /// crash-class and the pid is currently tracked, a missing record
    /// carrying the reason is appended and returned; the caller publishes
    /// it. Later poll cycles observing the same absence add nothing.
    pub fn record_exit(&mut self, pid: u32, reason: ExitReason) -> Option<MissingProcessRecord> {
        let is_crash = reason.is_crash();
        self.states.insert(pid, WatchState::Exited(reason.clone()));

        if !is_crash {
            debug!(pid, %reason, "Exit delivered, not a crash");
            return None;
        }

        let process = self.previous.get(&pid)?;
        let record = MissingProcessRecord {
            pid,
            name: process.name.clone(),
            command_line: process.command_line.clone(),
            working_directory: process.working_directory.clone(),
            detected_at: Utc::now(),
            exit_reason: Some(reason),
        };
        self.missing.push(record.clone());
        Some(record)
    }

    /// Marks a pid as covered by a live kernel exit watch.
    ///
    /// Called right after a successful registration so the next poll diff
    /// defers to the event path instead of flagging the pid itself.
    /// Never overwrites an already-delivered exit.
    pub fn mark_registered(&mut self, pid: u32) {
        self.states
            .entry(pid)
            .or_insert(WatchState::Registered);
    }

    /// Records that registration found the process already gone.
    ///
    /// The process died between the snapshot and the watch attempt, so
    /// its exit status is unknowable. The poll path will not re-flag it
    /// and no crash is asserted.
    pub fn record_unobserved_exit(&mut self, pid: u32) {
        let state = self.states.entry(pid).or_insert(WatchState::ExitedUnknown);
        if *state == WatchState::Registered {
            *state = WatchState::ExitedUnknown;
        }
    }

    /// Marks pids whose disappearance the next update is expected.
    ///
    /// Used when the caller itself requested termination. One-shot: the
    /// next [`update`](Self::update) consumes the whole set.
    pub fn suppress(&mut self, pids: impl IntoIterator<Item = u32>) {
        self.suppressed.extend(pids);
    }

    /// Reconciles the current matched set against the previous snapshot.
    ///
    /// Returns the records newly appended by this call: one per tracked
    /// pid that vanished without event coverage (unknown cause). Pids
    /// whose exit was already delivered, or whose registration is still
    /// presumed in flight, are left to the event path. Finishes by
    /// replacing the previous map, consuming suppressions, and dropping
    /// bookkeeping for pids that are neither alive nor awaiting
    /// acknowledgement.
    pub fn update(&mut self, current: &[WatchedProcess]) -> Vec<MissingProcessRecord> {
        let current_pids: HashSet<u32> = current.iter().map(|p| p.pid).collect();
        let mut newly_missing = Vec::new();

        for (pid, process) in &self.previous {
            if current_pids.contains(pid) {
                continue;
            }
            if self.suppressed.contains(pid) {
                debug!(pid, "Suppressed disappearance, termination was requested");
                continue;
            }
            match self.states.get(pid) {
                Some(state) if state.is_exit() => {
                    // Already handled via the event path
                }
                Some(WatchState::Registered) => {
                    // Delivery presumed in flight, do not race ahead of it
                    debug!(pid, "Disappeared while event-registered, awaiting delivery");
                }
                _ => {
                    // Poll-fallback: no event coverage, cause unknown
                    newly_missing.push(MissingProcessRecord {
                        pid: *pid,
                        name: process.name.clone(),
                        command_line: process.command_line.clone(),
                        working_directory: process.working_directory.clone(),
                        detected_at: Utc::now(),
                        exit_reason: None,
                    });
                }
            }
        }

        self.missing.extend(newly_missing.iter().cloned());

        self.previous = current.iter().map(|p| (p.pid, p.clone())).collect();
        self.suppressed.clear();
        self.collect_garbage();

        newly_missing
    }

    /// Removes the record(s) for a pid. Unknown pids are a no-op.
    pub fn acknowledge(&mut self, pid: u32) {
        self.missing.retain(|record| record.pid != pid);
        self.drop_exit_state(pid);
    }

    /// Removes every missing record and the associated exit bookkeeping.
    pub fn acknowledge_all(&mut self) {
        let pids: Vec<u32> = self.missing.iter().map(|record| record.pid).collect();
        self.missing.clear();
        for pid in pids {
            self.drop_exit_state(pid);
        }
    }

    /// Unacknowledged missing records, oldest first.
    #[must_use]
    pub fn missing(&self) -> &[MissingProcessRecord] {
        &self.missing
    }

    /// True while any missing record is unacknowledged.
    #[must_use]
    pub fn has_missing(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Number of unacknowledged missing records.
    #[must_use]
    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    /// Number of pids carried in the previous snapshot.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.previous.len()
    }

    /// Drops exit bookkeeping for pids that are neither in the live set
    /// nor referenced by an unacknowledged record.
    fn collect_garbage(&mut self) {
        let referenced: HashSet<u32> = self.missing.iter().map(|record| record.pid).collect();
        let previous = &self.previous;
        self.states
            .retain(|pid, _| previous.contains_key(pid) || referenced.contains(pid));
    }

    /// Drops a recorded exit for a pid, keeping any live registration.
    fn drop_exit_state(&mut self, pid: u32) {
        if self.states.get(&pid).is_some_and(WatchState::is_exit) {
            self.states.remove(&pid);
        }
    }
}
