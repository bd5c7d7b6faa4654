use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{GenerationId, GenerationOutcome, SessionController, SessionState, SubmitRejected};
use crate::core::conversation::Conversation;

/// Point-in-time copy of the session for readers outside the owner task.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub conversation: Conversation,
    pub state: SessionState,
    pub last_outcome: Option<GenerationOutcome>,
}

enum SessionCommand {
    Submit {
        text: String,
        reply: oneshot::Sender<Result<GenerationId, SubmitRejected>>,
    },
    Cancel {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Cloneable command surface for a running [`SessionRuntime`].
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub async fn submit(&self, text: impl Into<String>) -> Result<GenerationId, SubmitRejected> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Submit {
                text: text.into(),
                reply,
            })
            .map_err(|_| SubmitRejected::Closed)?;
        rx.await.unwrap_or(Err(SubmitRejected::Closed))
    }

    /// Returns whether a cancel was newly requested.
    pub async fn cancel(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Cancel { reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// `None` once the runtime has stopped.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Snapshot { reply }).ok()?;
        rx.await.ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Single-writer task that owns a [`SessionController`]. Commands and
/// generation updates are applied one at a time, in arrival order.
pub struct SessionRuntime {
    controller: SessionController,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl SessionRuntime {
    pub fn new(controller: SessionController) -> (Self, SessionHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        (
            Self {
                controller,
                commands,
            },
            SessionHandle { tx },
        )
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every [`SessionHandle`] has been dropped. An active
    /// generation is cancelled on the way out.
    pub async fn run(self) {
        let Self {
            mut controller,
            mut commands,
        } = self;

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => handle_command(&mut controller, command),
                    None => {
                        debug!("all session handles dropped; stopping runtime");
                        controller.cancel();
                        break;
                    }
                },
                Some(update) = controller.next_update() => controller.apply_update(update),
            }
        }
    }
}

fn handle_command(controller: &mut SessionController, command: SessionCommand) {
    match command {
        SessionCommand::Submit { text, reply } => {
            let _ = reply.send(controller.submit(&text));
        }
        SessionCommand::Cancel { reply } => {
            let _ = reply.send(controller.cancel());
        }
        SessionCommand::Snapshot { reply } => {
            let _ = reply.send(SessionSnapshot {
                conversation: controller.conversation().clone(),
                state: controller.state(),
                last_outcome: controller.last_outcome(),
            });
        }
    }
}
