//! Vigil Core - Shared domain types for process supervision
//!
//! This crate provides the platform-independent pieces of vigil:
//! glob pattern matching, exit-status decoding, the process snapshot
//! models, and the crash reconciler that merges kernel exit events
//! with periodic process-table polls.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod exit_reason;
pub mod matcher;
pub mod process;
pub mod reconcile;

// Re-exports for convenience
pub use error::PatternError;
pub use exit_reason::{signal_name, ExitReason};
pub use matcher::GlobMatcher;
pub use process::{
    group_by_working_directory, MissingProcessRecord, ProcessGroup, WatchPattern, WatchedProcess,
    UNKNOWN_GROUP,
};
pub use reconcile::CrashReconciler;
