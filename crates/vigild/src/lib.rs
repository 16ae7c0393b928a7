//! Vigil Daemon - process supervision and crash reconciliation
//!
//! This crate provides the daemon side of vigil:
//! - `snapshot` - process-table snapshots from `/proc`
//! - `exit_events` - kernel exit-event capture via the netlink process
//!   connector
//! - `supervisor` - the actor that merges both sources through the
//!   crash reconciler and publishes grouped results
//! - `patterns` - watch-pattern persistence
//! - `metrics` - self resource monitoring
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       vigild daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────┐        ┌────────────────────────┐     │
//! │  │ ProcfsSnapshot   │──poll──▶      Supervisor        │     │
//! │  │ Source (/proc)   │        │  (reconciler owner)    │     │
//! │  └──────────────────┘        └───▲──────────┬─────────┘     │
//! │                                  │          │               │
//! │  ┌──────────────────┐  ExitEvent │          │ WatchEvent    │
//! │  │ NetlinkExit      │────────────┘          ▼               │
//! │  │ Monitor (thread) │           ┌────────────────────────┐  │
//! │  └──────────────────┘           │   SupervisorHandle     │  │
//! │                                 │   (consumer surface)   │  │
//! │                                 └────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod exit_events;
pub mod metrics;
pub mod patterns;
pub mod snapshot;
pub mod supervisor;
