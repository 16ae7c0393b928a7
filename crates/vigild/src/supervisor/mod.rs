//! Process supervision using the actor pattern.
//!
//! The supervisor owns all reconciliation state. It receives consumer
//! commands via an mpsc channel, kernel exit deliveries via a second
//! channel, and runs poll cycles on a fixed interval - all serialized
//! through one task.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  ExitEvent   ┌─────────────────────────────┐
//! │ NetlinkExit      │─────────────▶│        Supervisor           │
//! │ Monitor (thread) │   (mpsc)     │  snapshot → match → watch   │
//! └──────────────────┘              │  → reconcile → publish      │
//!                                   └──────┬──────────────▲───────┘
//!                                          │ WatchEvent   │ commands
//!                                          ▼ (broadcast)  │ (mpsc)
//!                                   ┌─────────────────────┴───────┐
//!                                   │      SupervisorHandle       │
//!                                   └─────────────────────────────┘
//! ```

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::exit_events::ExitEvent;

mod actor;
mod commands;
mod handle;

pub use actor::{Supervisor, SupervisorOptions, DEFAULT_POLL_INTERVAL};
pub use commands::{SupervisorCommand, SupervisorError, WatchEvent, WatchSnapshot};
pub use handle::SupervisorHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 64;

/// Spawns the supervisor actor and returns a handle for interaction.
///
/// `exit_events` is the receiving end of the channel the exit monitor
/// delivers into; pass the receiver of a fresh channel when running
/// poll-only.
pub fn spawn_supervisor(
    options: SupervisorOptions,
    exit_events: mpsc::UnboundedReceiver<ExitEvent>,
    cancel: CancellationToken,
) -> SupervisorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let supervisor = Supervisor::new(options, event_tx.clone());
    tokio::spawn(supervisor.run(cmd_rx, exit_events, cancel));

    SupervisorHandle::new(cmd_tx, event_tx)
}
