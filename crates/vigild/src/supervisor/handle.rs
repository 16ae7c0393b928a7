//! Client interface for interacting with the supervisor actor.
//!
//! The `SupervisorHandle` is a cheap-to-clone facade over the command
//! channel. This is the only mutation surface the core exposes: consumers
//! read the published state and issue acknowledge/kill commands back
//! through it.

use tokio::sync::{broadcast, mpsc, oneshot};

use vigil_core::{MissingProcessRecord, ProcessGroup};

use super::commands::{SupervisorCommand, SupervisorError, WatchEvent};

// ============================================================================
// Supervisor Handle
// ============================================================================

/// Handle for interacting with the supervisor actor.
///
/// Clone freely; all clones talk to the same actor. Methods are async
/// and resolve once the actor has processed the command.
#[derive(Clone)]
pub struct SupervisorHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<SupervisorCommand>,

    /// Event broadcaster for subscribing to published cycles
    event_sender: broadcast::Sender<WatchEvent>,
}

impl SupervisorHandle {
    /// Creates a handle over existing channels.
    pub fn new(
        sender: mpsc::Sender<SupervisorCommand>,
        event_sender: broadcast::Sender<WatchEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Runs a poll cycle immediately and waits for it to finish.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::ChannelClosed` if the actor has shut down
    pub async fn poll_now(&self) -> Result<(), SupervisorError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(SupervisorCommand::PollNow { respond_to: tx })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;

        rx.await.map_err(|_| SupervisorError::ChannelClosed)
    }

    /// Current working-directory groups of matched processes.
    ///
    /// Returns an empty vector if the actor is gone.
    pub async fn groups(&self) -> Vec<ProcessGroup> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(SupervisorCommand::GetGroups { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Unacknowledged missing-process records, oldest first.
    ///
    /// Returns an empty vector if the actor is gone.
    pub async fn missing(&self) -> Vec<MissingProcessRecord> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(SupervisorCommand::GetMissing { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// True while any missing record is unacknowledged.
    pub async fn has_crashes(&self) -> bool {
        !self.missing().await.is_empty()
    }

    /// Removes the record(s) for a pid. Unknown pids are a no-op.
    pub async fn acknowledge(&self, pid: u32) {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(SupervisorCommand::Acknowledge {
                pid,
                respond_to: tx,
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Removes every missing record.
    pub async fn acknowledge_all(&self) {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(SupervisorCommand::AcknowledgeAll { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Terminates every process in the group for a working directory.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::UnknownGroup` if no group has that directory
    /// - `SupervisorError::ChannelClosed` if the actor has shut down
    pub async fn kill_group(
        &self,
        working_directory: impl Into<String>,
    ) -> Result<usize, SupervisorError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(SupervisorCommand::KillGroup {
                working_directory: working_directory.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;

        rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Re-reads the pattern store. Returns the active pattern count, or
    /// zero if the actor is gone.
    pub async fn reload_patterns(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(SupervisorCommand::ReloadPatterns { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Subscribes to the published event stream.
    ///
    /// Synchronous; does not talk to the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.event_sender.subscribe()
    }

    /// True while the actor is still accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    fn create_test_handle() -> (SupervisorHandle, mpsc::Receiver<SupervisorCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = SupervisorHandle::new(cmd_tx, event_tx);
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_poll_now_round_trip() {
        let (handle, mut rx) = create_test_handle();

        let responder = tokio::spawn(async move {
            if let Some(SupervisorCommand::PollNow { respond_to }) = rx.recv().await {
                let _ = respond_to.send(());
                return true;
            }
            false
        });

        assert!(handle.poll_now().await.is_ok());
        assert!(responder.await.unwrap());
    }

    #[tokio::test]
    async fn test_poll_now_channel_closed() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(matches!(
            handle.poll_now().await,
            Err(SupervisorError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_groups_empty_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(handle.groups().await.is_empty());
        assert!(handle.missing().await.is_empty());
        assert!(!handle.has_crashes().await);
    }

    #[tokio::test]
    async fn test_acknowledge_tolerates_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        // Must not hang or panic
        handle.acknowledge(42).await;
        handle.acknowledge_all().await;
        assert_eq!(handle.reload_patterns().await, 0);
    }

    #[tokio::test]
    async fn test_kill_group_passes_directory() {
        let (handle, mut rx) = create_test_handle();

        let responder = tokio::spawn(async move {
            if let Some(SupervisorCommand::KillGroup {
                working_directory,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(working_directory, "/work/project");
                let _ = respond_to.send(Ok(3));
                return true;
            }
            false
        });

        let killed = handle.kill_group("/work/project").await;
        assert!(matches!(killed, Ok(3)));
        assert!(responder.await.unwrap());
    }

    #[tokio::test]
    async fn test_is_connected() {
        let (handle, rx) = create_test_handle();
        assert!(handle.is_connected());

        drop(rx);
        let (tx, _rx) = oneshot::channel();
        let _ = handle
            .sender
            .send(SupervisorCommand::PollNow { respond_to: tx })
            .await;
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_subscribe_returns_receiver() {
        let (handle, _rx) = create_test_handle();
        let _subscriber = handle.subscribe();
    }
}
