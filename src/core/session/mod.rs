//! Session controller: owns the conversation and runs one generation at a
//! time through the provider and the stream aggregator.
//!
//! The controller is a single-writer state machine. Provider I/O runs on a
//! spawned task that reports back with [`GenerationUpdate`]s; the owner
//! applies them with [`SessionController::apply_update`], so conversation
//! state is only ever mutated from one context. [`SessionRuntime`] wraps the
//! controller in such an owner task and exposes a cloneable
//! [`SessionHandle`] command surface.

mod controller;
mod generation;
mod runtime;

use std::fmt;
use std::time::Duration;

use crate::core::aggregator::DEFAULT_FLUSH_INTERVAL;
use crate::core::context::DEFAULT_MAX_HISTORY;
use crate::core::message::Message;
use crate::core::provider::ErrorKind;

pub use controller::{GenerationHandle, SessionController};
pub use generation::GenerationUpdate;
pub use runtime::{SessionHandle, SessionRuntime, SessionSnapshot};

/// Written into the assistant message when the user stops a generation.
pub const GENERATION_STOPPED_MARKER: &str = "[Generation stopped]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId(pub u64);

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Thinking,
    Streaming,
    Finalizing,
    Cancelled,
    Failed,
    Completed,
}

impl GenerationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GenerationState::Cancelled | GenerationState::Failed | GenerationState::Completed
        )
    }
}

/// Conversation-level view of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Thinking,
    Streaming,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    Cancelled,
    Failed(ErrorKind),
}

impl GenerationOutcome {
    fn terminal_state(self) -> GenerationState {
        match self {
            GenerationOutcome::Completed => GenerationState::Completed,
            GenerationOutcome::Cancelled => GenerationState::Cancelled,
            GenerationOutcome::Failed(_) => GenerationState::Failed,
        }
    }
}

/// Notifications for the presentation layer, published in the order the
/// underlying mutations happen.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    UserMessageAdded {
        index: usize,
        message: Message,
    },
    AssistantPlaceholderAdded {
        index: usize,
        generation: GenerationId,
    },
    AssistantContentUpdated {
        index: usize,
        text: String,
    },
    GenerationStateChanged {
        generation: GenerationId,
        state: GenerationState,
    },
    GenerationEnded {
        generation: GenerationId,
        index: usize,
        outcome: GenerationOutcome,
        content: String,
    },
}

/// Why a submit was refused. Refusals leave the conversation untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejected {
    Empty,
    Busy,
    /// The owning runtime has shut down.
    Closed,
}

impl fmt::Display for SubmitRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitRejected::Empty => write!(f, "message is empty"),
            SubmitRejected::Busy => write!(f, "a response is still being generated"),
            SubmitRejected::Closed => write!(f, "chat session has ended"),
        }
    }
}

impl std::error::Error for SubmitRejected {}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Messages (not exchanges) of history sent with each request.
    pub max_history: usize,
    /// `None` disables throttling of content updates.
    pub flush_interval: Option<Duration>,
    pub system_prompt: Option<String>,
    /// Seeded as the first assistant message of a new conversation.
    pub greeting: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            flush_interval: Some(DEFAULT_FLUSH_INTERVAL),
            system_prompt: None,
            greeting: None,
        }
    }
}
