//! Conversation Session Shell
//!
//! Runs one [`TurnController`] on its own task and hands out a cloneable
//! command surface plus the read side of its snapshot and event streams.
//! Dropping the session closes the command channel, which stops the
//! controller from any state.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::controller::{Collaborators, Command, ControllerConfig, Diagnostics, TurnController};
use super::state::{ConversationEvent, Snapshot};
use crate::{Error, Result};

/// Sends commands to a running controller
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Session("conversation controller stopped".to_string()))
    }

    /// Greet, then start listening
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the controller has stopped
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    /// Stop immediately, from any state
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the controller has stopped
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Say goodbye and end the conversation
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the controller has stopped
    pub fn end(&self) -> Result<()> {
        self.send(Command::End)
    }

    /// Cut the assistant's speech short
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the controller has stopped
    pub fn interrupt(&self) -> Result<()> {
        self.send(Command::Interrupt)
    }

    /// Close the microphone until [`SessionHandle::unmute`]
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the controller has stopped
    pub fn mute(&self) -> Result<()> {
        self.send(Command::Mute)
    }

    /// Reopen the microphone
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the controller has stopped
    pub fn unmute(&self) -> Result<()> {
        self.send(Command::Unmute)
    }

    /// Replace the meeting context used from the next turn on
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the controller has stopped
    pub fn set_context(&self, context: impl Into<String>) -> Result<()> {
        self.send(Command::SetContext(context.into()))
    }

    /// Ask the controller for its internal bookkeeping
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the controller has stopped
    pub async fn diagnostics(&self) -> Result<Diagnostics> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Inspect(tx))?;
        rx.await
            .map_err(|_| Error::Session("conversation controller stopped".to_string()))
    }
}

/// One running voice-chat session
pub struct ConversationSession {
    handle: SessionHandle,
    snapshot: watch::Receiver<Snapshot>,
    events: Option<mpsc::UnboundedReceiver<ConversationEvent>>,
    task: JoinHandle<()>,
}

impl ConversationSession {
    /// Spawn an idle controller; call [`SessionHandle::start`] to begin
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        config: ControllerConfig,
        collaborators: Collaborators,
        context: impl Into<String>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        let controller =
            TurnController::new(config, collaborators, context.into(), events_tx, snapshot_tx);
        let task = tokio::spawn(controller.run(commands_rx));

        Self {
            handle: SessionHandle {
                commands: commands_tx,
            },
            snapshot: snapshot_rx,
            events: Some(events_rx),
            task,
        }
    }

    /// Command surface
    #[must_use]
    pub const fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Take the ordered event stream; `None` once taken
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConversationEvent>> {
        self.events.take()
    }

    /// Stop the controller and wait for it to finish tearing down
    ///
    /// Clones of the handle keep the controller alive until dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the controller task panicked
    pub async fn shutdown(self) -> Result<()> {
        let Self { handle, task, .. } = self;
        let _ = handle.stop();
        drop(handle);
        task.await.map_err(|e| Error::Session(e.to_string()))
    }
}

impl std::ops::Deref for ConversationSession {
    type Target = SessionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}
