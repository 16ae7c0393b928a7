//! Kernel exit-event capture.
//!
//! The exit-event path is the second information source feeding the
//! reconciler: where the poll can only observe that a process is gone,
//! the kernel reports *why* - the raw wait-status word of every exit.
//!
//! The production implementation is [`NetlinkExitMonitor`], a netlink
//! process-connector subscriber. The [`ExitWatch`] trait is the seam the
//! supervisor works against, so tests can script registrations.

use std::io;

use vigil_core::ExitReason;

mod netlink;

pub use netlink::NetlinkExitMonitor;

// ============================================================================
// Events
// ============================================================================

/// A decoded exit delivered for a watched pid.
///
/// Delivered exactly once per successful registration, on the channel
/// handed to the monitor at construction.
#[derive(Debug, Clone)]
pub struct ExitEvent {
    /// The pid that exited
    pub pid: u32,
    /// Decoded wait status
    pub reason: ExitReason,
}

/// Result of a watch registration attempt.
#[derive(Debug)]
pub enum WatchOutcome {
    /// The watch is registered; an [`ExitEvent`] will follow, once.
    Registered,
    /// The process was already gone; no event will ever arrive and the
    /// cause of death is unknowable. Not an error.
    AlreadyExited,
    /// Registration failed for another reason. The process stays
    /// unmonitored by the event path; the poll covers it next cycle.
    Failed(io::Error),
}

// ============================================================================
// Watch Interface
// ============================================================================

/// Registration interface for kernel exit watches.
///
/// Registrations are one-shot: a delivery atomically removes the
/// registration, so duplicate deliveries for the same registration are
/// impossible. Implementations are safe to call concurrently with their
/// own delivery path.
pub trait ExitWatch: Send + Sync {
    /// Registers interest in a pid's exit.
    fn watch(&self, pid: u32) -> WatchOutcome;

    /// True while a registration for the pid is live.
    fn is_watching(&self, pid: u32) -> bool;

    /// Removes a registration. Unknown pids are a no-op.
    fn unwatch(&self, pid: u32);
}
