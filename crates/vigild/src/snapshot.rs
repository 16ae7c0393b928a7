//! Process-table snapshots from `/proc`.
//!
//! A snapshot enumerates every live process and extracts the metadata
//! the matcher and reconciler work on. Individual unreadable processes
//! (permission, or a race with their exit during enumeration) are
//! skipped silently; they are not a failure of the snapshot.
//!
//! All functions here perform blocking I/O and are called via
//! `spawn_blocking` from the supervisor.

use tracing::trace;

use vigil_core::WatchedProcess;

/// Upper bound on parsed command-line entries, to bound memory on
/// pathological argument vectors.
pub const MAX_CMDLINE_ARGS: usize = 20;

// ============================================================================
// Snapshot Source
// ============================================================================

/// Source of process-table snapshots.
///
/// The trait seam exists so the supervisor can be driven by scripted
/// snapshots in tests; production uses [`ProcfsSnapshotSource`].
pub trait SnapshotSource: Send + Sync + 'static {
    /// Enumerates all live processes at call time.
    ///
    /// No error return: processes that cannot be read are skipped, and a
    /// completely unreadable process table yields an empty snapshot.
    fn snapshot(&self) -> Vec<WatchedProcess>;
}

// ============================================================================
// Procfs Implementation
// ============================================================================

/// Reads snapshots from `/proc` via the `procfs` crate.
#[derive(Debug, Clone)]
pub struct ProcfsSnapshotSource {
    ticks_per_second: u64,
    page_size: u64,
}

impl ProcfsSnapshotSource {
    /// Creates a source, caching the kernel clock-tick and page-size
    /// constants.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ticks_per_second: procfs::ticks_per_second(),
            page_size: procfs::page_size(),
        }
    }

    fn read_process(&self, process: &procfs::process::Process) -> Option<WatchedProcess> {
        let stat = process.stat().ok()?;
        let command_line = join_cmdline(process.cmdline().ok()?)?;

        let working_directory = process
            .cwd()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();

        let memory_mb =
            (stat.rss.max(0) as u64 * self.page_size) as f64 / (1024.0 * 1024.0);
        let cpu_percent = approx_cpu_percent(stat.utime + stat.stime, self.ticks_per_second);

        Some(WatchedProcess {
            pid: process.pid.max(0) as u32,
            name: stat.comm,
            command_line,
            working_directory,
            cpu_percent,
            memory_mb,
        })
    }
}

impl Default for ProcfsSnapshotSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for ProcfsSnapshotSource {
    fn snapshot(&self) -> Vec<WatchedProcess> {
        let all = match procfs::process::all_processes() {
            Ok(iter) => iter,
            Err(error) => {
                trace!(%error, "Failed to enumerate /proc");
                return Vec::new();
            }
        };

        let mut processes: Vec<WatchedProcess> = all
            .flatten()
            .filter_map(|process| self.read_process(&process))
            .collect();

        processes.sort_by_key(|p| p.pid);
        processes
    }
}

// ============================================================================
// Extraction Helpers
// ============================================================================

/// Joins an argument vector into one command line.
///
/// Entries are capped at [`MAX_CMDLINE_ARGS`]; returns `None` for an
/// empty vector (kernel threads and processes that cleared their argv).
fn join_cmdline(mut args: Vec<String>) -> Option<String> {
    args.retain(|arg| !arg.is_empty());
    if args.is_empty() {
        return None;
    }
    args.truncate(MAX_CMDLINE_ARGS);
    Some(args.join(" "))
}

/// Folds accumulated CPU time into a 0-99.9 figure.
///
/// This is a coarse indicator derived from total utime+stime, not a
/// rate; a true percentage would require deltas between polls.
fn approx_cpu_percent(total_ticks: u64, ticks_per_second: u64) -> f64 {
    if ticks_per_second == 0 {
        return 0.0;
    }
    let seconds = total_ticks as f64 / ticks_per_second as f64;
    (seconds % 100.0).min(99.9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_cmdline_empty_is_none() {
        assert_eq!(join_cmdline(Vec::new()), None);
        assert_eq!(join_cmdline(vec![String::new()]), None);
    }

    #[test]
    fn test_join_cmdline_joins_with_spaces() {
        let args = vec![
            "/usr/bin/node".to_string(),
            "gulp".to_string(),
            "watch-client".to_string(),
        ];
        assert_eq!(
            join_cmdline(args),
            Some("/usr/bin/node gulp watch-client".to_string())
        );
    }

    #[test]
    fn test_join_cmdline_caps_argument_count() {
        let args: Vec<String> = (0..100).map(|i| format!("arg{i}")).collect();
        let joined = join_cmdline(args).unwrap_or_default();
        assert_eq!(joined.split(' ').count(), MAX_CMDLINE_ARGS);
    }

    #[test]
    fn test_approx_cpu_percent_bounds() {
        assert_eq!(approx_cpu_percent(0, 100), 0.0);
        assert!(approx_cpu_percent(250, 100) > 0.0);
        // Folds rather than growing without bound
        assert!(approx_cpu_percent(1_000_000, 100) < 100.0);
        // Degenerate tick rate
        assert_eq!(approx_cpu_percent(100, 0), 0.0);
    }

    #[test]
    fn test_snapshot_includes_current_process() {
        let source = ProcfsSnapshotSource::new();
        let snapshot = source.snapshot();
        assert!(!snapshot.is_empty());

        let own_pid = std::process::id();
        let me = snapshot.iter().find(|p| p.pid == own_pid);
        let me = me.expect("current process should appear in its own snapshot");
        assert!(!me.name.is_empty());
        assert!(!me.command_line.is_empty());
    }

    #[test]
    fn test_snapshot_is_sorted_and_has_no_empty_command_lines() {
        let source = ProcfsSnapshotSource::new();
        let snapshot = source.snapshot();

        let mut last_pid = 0;
        for process in &snapshot {
            assert!(process.pid >= last_pid, "snapshot must be sorted by pid");
            last_pid = process.pid;
            assert!(!process.command_line.is_empty());
        }
    }
}
