//! Process snapshot models and the working-directory projection.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exit_reason::ExitReason;

/// Group key used for processes whose working directory is unresolvable.
pub const UNKNOWN_GROUP: &str = "Unknown";

// ============================================================================
// Watched Process
// ============================================================================

/// A matched process as observed in one snapshot.
///
/// Immutable value, re-created every poll cycle. The pid is reused by
/// the OS after a process dies and must not be treated as a permanent
/// key across long windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedProcess {
    /// Process id
    pub pid: u32,
    /// Short process name (comm)
    pub name: String,
    /// Full command line, arguments joined by spaces
    pub command_line: String,
    /// Current working directory, empty if unresolvable
    pub working_directory: String,
    /// Accumulated CPU time folded into a 0-99.9 figure.
    /// An approximation, not a rate; do not build contracts on it.
    pub cpu_percent: f64,
    /// Resident memory in megabytes
    pub memory_mb: f64,
}

// ============================================================================
// Process Group
// ============================================================================

/// Processes sharing a working directory, for grouped presentation.
///
/// Created fresh from the matched set every cycle, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessGroup {
    /// The shared working directory, or [`UNKNOWN_GROUP`]
    pub working_directory: String,
    /// Member processes, sorted by name
    pub processes: Vec<WatchedProcess>,
}

/// Projects a flat matched set into groups keyed by working directory.
///
/// Processes within a group are sorted by name (pid as tiebreak), groups
/// by working directory. An empty working directory buckets under
/// [`UNKNOWN_GROUP`].
#[must_use]
pub fn group_by_working_directory(processes: &[WatchedProcess]) -> Vec<ProcessGroup> {
    let mut buckets: BTreeMap<String, Vec<WatchedProcess>> = BTreeMap::new();

    for process in processes {
        let key = if process.working_directory.is_empty() {
            UNKNOWN_GROUP.to_string()
        } else {
            process.working_directory.clone()
        };
        buckets.entry(key).or_default().push(process.clone());
    }

    buckets
        .into_iter()
        .map(|(working_directory, mut members)| {
            members.sort_by(|a, b| a.name.cmp(&b.name).then(a.pid.cmp(&b.pid)));
            ProcessGroup {
                working_directory,
                processes: members,
            }
        })
        .collect()
}

// ============================================================================
// Missing Process Record
// ============================================================================

/// A matched process that disappeared and has not been acknowledged.
///
/// Appended once per disappearance; removed only by acknowledgement.
/// `exit_reason` is `None` when the cause of death was never observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingProcessRecord {
    /// Process id at the time it was tracked
    pub pid: u32,
    /// Short process name
    pub name: String,
    /// Full command line
    pub command_line: String,
    /// Working directory it ran in
    pub working_directory: String,
    /// When the disappearance was detected
    pub detected_at: DateTime<Utc>,
    /// Decoded exit status, if the kernel event path observed it
    pub exit_reason: Option<ExitReason>,
}

// ============================================================================
// Watch Pattern
// ============================================================================

/// A user-authored glob pattern selecting command lines to watch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchPattern {
    /// Stable identity, survives edits to the pattern text
    pub id: Uuid,
    /// Glob pattern text
    pub pattern: String,
    /// Disabled patterns never contribute to matching
    pub enabled: bool,
}

impl WatchPattern {
    /// Creates an enabled pattern with a fresh identity.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pattern: pattern.into(),
            enabled: true,
        }
    }

    /// The patterns installed when no configuration exists yet.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("*gulp*watch-client*"),
            Self::new("*gulp*watch-extensions*"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(pid: u32, name: &str, cwd: &str) -> WatchedProcess {
        WatchedProcess {
            pid,
            name: name.to_string(),
            command_line: format!("/usr/bin/{name}"),
            working_directory: cwd.to_string(),
            cpu_percent: 0.0,
            memory_mb: 10.0,
        }
    }

    #[test]
    fn test_grouping_sorts_groups_and_members() {
        let processes = vec![
            process(3, "zeta", "/work/b"),
            process(1, "alpha", "/work/a"),
            process(2, "beta", "/work/b"),
        ];

        let groups = group_by_working_directory(&processes);
        assert_eq!(groups.len(), 2);

        assert_eq!(groups[0].working_directory, "/work/a");
        assert_eq!(groups[1].working_directory, "/work/b");

        let names: Vec<&str> = groups[1].processes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "zeta"]);
    }

    #[test]
    fn test_grouping_buckets_empty_cwd_under_unknown() {
        let processes = vec![process(1, "orphan", ""), process(2, "rooted", "/work")];

        let groups = group_by_working_directory(&processes);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().any(|g| g.working_directory == UNKNOWN_GROUP));
        let unknown = groups
            .iter()
            .find(|g| g.working_directory == UNKNOWN_GROUP)
            .map(|g| g.processes.len());
        assert_eq!(unknown, Some(1));
    }

    #[test]
    fn test_grouping_name_tie_breaks_on_pid() {
        let processes = vec![process(20, "same", "/w"), process(10, "same", "/w")];

        let groups = group_by_working_directory(&processes);
        let pids: Vec<u32> = groups[0].processes.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![10, 20]);
    }

    #[test]
    fn test_default_patterns() {
        let defaults = WatchPattern::defaults();
        assert_eq!(defaults.len(), 2);
        assert!(defaults.iter().all(|p| p.enabled));
        assert_eq!(defaults[0].pattern, "*gulp*watch-client*");
        assert_eq!(defaults[1].pattern, "*gulp*watch-extensions*");
        assert_ne!(defaults[0].id, defaults[1].id);
    }

    #[test]
    fn test_pattern_serde_round_trip() {
        let pattern = WatchPattern::new("*cargo*build*");
        let json = serde_json::to_string(&pattern).unwrap_or_default();
        let decoded: WatchPattern = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, pattern);
    }
}
