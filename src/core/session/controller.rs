use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::generation::{run_generation, GenerationRequest, GenerationUpdate};
use super::{
    GenerationId, GenerationOutcome, GenerationState, SessionEvent, SessionSettings, SessionState,
    SubmitRejected, GENERATION_STOPPED_MARKER,
};
use crate::core::aggregator::AggregateOutcome;
use crate::core::context::{build_context, with_system_prompt};
use crate::core::conversation::Conversation;
use crate::core::message::Message;
use crate::core::provider::{ChatProvider, ProviderOptions};

/// One in-flight request.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    id: GenerationId,
    cancel: CancellationToken,
    state: GenerationState,
    cancel_requested: bool,
}

impl GenerationHandle {
    pub fn id(&self) -> GenerationId {
        self.id
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }
}

#[derive(Debug)]
struct ActiveGeneration {
    handle: GenerationHandle,
    message_index: usize,
}

/// Owns the conversation and enforces the one-generation-at-a-time rule.
///
/// All methods must be called from the single owning task. `submit` spawns
/// the generation onto the current tokio runtime; its progress arrives
/// through [`next_update`](Self::next_update) and is committed with
/// [`apply_update`](Self::apply_update).
pub struct SessionController {
    provider: Arc<dyn ChatProvider>,
    options: ProviderOptions,
    settings: SessionSettings,
    conversation: Conversation,
    active: Option<ActiveGeneration>,
    last_outcome: Option<GenerationOutcome>,
    next_id: u64,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    updates_tx: mpsc::UnboundedSender<GenerationUpdate>,
    updates_rx: mpsc::UnboundedReceiver<GenerationUpdate>,
}

impl SessionController {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        options: ProviderOptions,
        settings: SessionSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let mut conversation = Conversation::new();
        if let Some(greeting) = settings
            .greeting
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
        {
            conversation.push(Message::assistant(greeting));
        }

        let controller = Self {
            provider,
            options,
            settings,
            conversation,
            active: None,
            last_outcome: None,
            next_id: 1,
            events_tx,
            updates_tx,
            updates_rx,
        };
        (controller, events_rx)
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn active_generation(&self) -> Option<&GenerationHandle> {
        self.active.as_ref().map(|active| &active.handle)
    }

    pub fn last_outcome(&self) -> Option<GenerationOutcome> {
        self.last_outcome
    }

    pub fn state(&self) -> SessionState {
        match self.active.as_ref().map(|active| active.handle.state) {
            Some(GenerationState::Thinking) => SessionState::Thinking,
            Some(GenerationState::Streaming) => SessionState::Streaming,
            Some(GenerationState::Finalizing) => SessionState::Finalizing,
            _ => SessionState::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    /// Starts a generation for `text`. Rejections leave the conversation
    /// untouched.
    pub fn submit(&mut self, text: &str) -> Result<GenerationId, SubmitRejected> {
        if text.trim().is_empty() {
            return Err(SubmitRejected::Empty);
        }
        if let Some(active) = &self.active {
            debug!(active = %active.handle.id, "rejecting submit while generating");
            return Err(SubmitRejected::Busy);
        }

        let user = Message::user(text);
        let user_index = self.conversation.push(user.clone());
        self.emit(SessionEvent::UserMessageAdded {
            index: user_index,
            message: user,
        });

        let id = GenerationId(self.next_id);
        self.next_id += 1;
        let message_index = self.conversation.push(Message::thinking_placeholder());
        self.emit(SessionEvent::AssistantPlaceholderAdded {
            index: message_index,
            generation: id,
        });

        let messages = with_system_prompt(
            build_context(
                self.conversation.iter_excluding(message_index),
                text,
                self.settings.max_history,
            ),
            self.settings.system_prompt.as_deref(),
        );

        let cancel = CancellationToken::new();
        self.active = Some(ActiveGeneration {
            handle: GenerationHandle {
                id,
                cancel: cancel.clone(),
                state: GenerationState::Thinking,
                cancel_requested: false,
            },
            message_index,
        });
        self.emit(SessionEvent::GenerationStateChanged {
            generation: id,
            state: GenerationState::Thinking,
        });

        info!(
            %id,
            model = %self.options.model,
            context_messages = messages.len(),
            "starting generation"
        );
        tokio::spawn(run_generation(
            Arc::clone(&self.provider),
            GenerationRequest {
                id,
                messages,
                options: self.options.clone(),
                cancel,
                flush_interval: self.settings.flush_interval,
            },
            self.updates_tx.clone(),
        ));

        Ok(id)
    }

    /// Signals the active generation to stop. Returns `false` when idle or
    /// when a cancel is already pending. The state only moves to
    /// `Cancelled` once the generation task has unwound.
    pub fn cancel(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) if !active.handle.cancel_requested => {
                active.handle.cancel_requested = true;
                active.handle.cancel.cancel();
                info!(id = %active.handle.id, "cancel requested");
                true
            }
            _ => false,
        }
    }

    /// Waits for the next update from a generation task.
    pub async fn next_update(&mut self) -> Option<GenerationUpdate> {
        self.updates_rx.recv().await
    }

    /// Commits a generation task's update to the conversation. Updates from
    /// generations other than the active one are dropped.
    pub fn apply_update(&mut self, update: GenerationUpdate) {
        let Some((id, index)) = self
            .active
            .as_ref()
            .map(|active| (active.handle.id, active.message_index))
        else {
            debug!(id = %update.id(), "dropping update while idle");
            return;
        };
        if update.id() != id {
            debug!(stale = %update.id(), current = %id, "dropping stale update");
            return;
        }

        match update {
            GenerationUpdate::FirstChunk { .. } => {
                if let Some(message) = self.conversation.get_mut(index) {
                    message.thinking = false;
                }
                self.set_state(GenerationState::Streaming);
            }
            GenerationUpdate::Content { text, .. } => {
                if let Some(message) = self.conversation.get_mut(index) {
                    message.thinking = false;
                    message.content.clone_from(&text);
                }
                self.emit(SessionEvent::AssistantContentUpdated { index, text });
            }
            GenerationUpdate::Finished { outcome, .. } => self.finish(outcome),
        }
    }

    /// Applies updates until the active generation (if any) has ended.
    pub async fn run_until_idle(&mut self) {
        while !self.is_idle() {
            match self.next_update().await {
                Some(update) => self.apply_update(update),
                None => break,
            }
        }
    }

    fn finish(&mut self, outcome: AggregateOutcome) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let id = active.handle.id;
        let index = active.message_index;
        let cancelled = active.handle.cancel_requested || active.handle.cancel.is_cancelled();

        let (outcome, content) = match outcome {
            _ if cancelled => (GenerationOutcome::Cancelled, GENERATION_STOPPED_MARKER.to_string()),
            AggregateOutcome::Completed(text) => {
                self.set_state(GenerationState::Finalizing);
                (GenerationOutcome::Completed, text)
            }
            AggregateOutcome::Cancelled { .. } => {
                (GenerationOutcome::Cancelled, GENERATION_STOPPED_MARKER.to_string())
            }
            AggregateOutcome::Failed(err) => {
                warn!(%id, error = %err, "generation failed");
                (GenerationOutcome::Failed(err.kind()), err.user_facing_summary())
            }
        };

        let changed = match self.conversation.get_mut(index) {
            Some(message) => {
                message.thinking = false;
                let changed = message.content != content;
                message.content.clone_from(&content);
                changed
            }
            None => false,
        };
        if changed {
            self.emit(SessionEvent::AssistantContentUpdated {
                index,
                text: content.clone(),
            });
        }

        self.set_state(outcome.terminal_state());
        self.active = None;
        self.last_outcome = Some(outcome);
        info!(%id, ?outcome, "generation ended");
        self.emit(SessionEvent::GenerationEnded {
            generation: id,
            index,
            outcome,
            content,
        });
    }

    fn set_state(&mut self, state: GenerationState) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.handle.state == state {
            return;
        }
        active.handle.state = state;
        let generation = active.handle.id;
        self.emit(SessionEvent::GenerationStateChanged { generation, state });
    }

    fn emit(&self, event: SessionEvent) {
        // The presentation layer may have gone away; the transcript is still
        // authoritative.
        let _ = self.events_tx.send(event);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.handle.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChatMessage;
    use crate::core::provider::{ErrorKind, ProviderError, StreamChunk};
    use crate::utils::test_utils::{Script, ScriptedProvider};

    fn settings() -> SessionSettings {
        SessionSettings {
            flush_interval: None,
            ..SessionSettings::default()
        }
    }

    fn controller_with(
        provider: &Arc<ScriptedProvider>,
        settings: SessionSettings,
    ) -> (SessionController, mpsc::UnboundedReceiver<SessionEvent>) {
        SessionController::new(provider.clone(), ProviderOptions::new("test-model"), settings)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn apply_until_content(controller: &mut SessionController, index: usize, text: &str) {
        while controller.conversation().get(index).map(|m| m.content.as_str()) != Some(text) {
            let update = controller.next_update().await.expect("update channel open");
            controller.apply_update(update);
        }
    }

    #[tokio::test]
    async fn hello_streams_into_assistant_message() {
        let provider =
            Arc::new(ScriptedProvider::new().with_script(Script::text(&["Hi", " there"])));
        let (mut controller, mut events) = controller_with(&provider, settings());

        controller.submit("hello").expect("submit accepted");

        let conversation = controller.conversation();
        assert_eq!(conversation.len(), 2);
        let user = conversation.get(0).expect("user message");
        assert!(user.is_user());
        assert_eq!(user.content, "hello");
        let placeholder = conversation.get(1).expect("placeholder");
        assert!(placeholder.is_assistant());
        assert!(placeholder.thinking);
        assert!(placeholder.content.is_empty());
        assert_eq!(controller.state(), SessionState::Thinking);

        controller.run_until_idle().await;

        let reply = controller.conversation().get(1).expect("assistant message");
        assert!(!reply.thinking);
        assert_eq!(reply.content, "Hi there");
        assert_eq!(controller.last_outcome(), Some(GenerationOutcome::Completed));
        assert_eq!(controller.state(), SessionState::Idle);

        let events = drain(&mut events);
        assert!(matches!(
            events.first(),
            Some(SessionEvent::UserMessageAdded { index: 0, .. })
        ));
        assert!(matches!(
            events.get(1),
            Some(SessionEvent::AssistantPlaceholderAdded { index: 1, .. })
        ));
        let updates: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::AssistantContentUpdated { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec!["Hi", "Hi there"]);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::GenerationEnded {
                outcome: GenerationOutcome::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn state_changes_follow_lifecycle() {
        let provider = Arc::new(ScriptedProvider::new().with_script(Script::text(&["ok"])));
        let (mut controller, mut events) = controller_with(&provider, settings());

        controller.submit("go").expect("submit accepted");
        controller.run_until_idle().await;

        let states: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::GenerationStateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                GenerationState::Thinking,
                GenerationState::Streaming,
                GenerationState::Finalizing,
                GenerationState::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn blank_submit_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new());
        let (mut controller, mut events) = controller_with(&provider, settings());

        assert_eq!(controller.submit("   \n"), Err(SubmitRejected::Empty));
        assert!(controller.conversation().is_empty());
        assert!(controller.active_generation().is_none());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn submit_while_generating_is_rejected() {
        let (script, feed) = Script::gated();
        let provider = Arc::new(ScriptedProvider::new().with_script(script));
        let (mut controller, _events) = controller_with(&provider, settings());

        let first = controller.submit("first").expect("submit accepted");
        let before = controller.conversation().clone();

        assert_eq!(controller.submit("second"), Err(SubmitRejected::Busy));
        assert_eq!(controller.conversation(), &before);
        assert_eq!(controller.active_generation().map(|h| h.id()), Some(first));

        drop(feed);
        controller.run_until_idle().await;
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn chunk_order_is_preserved() {
        let chunks: Vec<String> = (0..50).map(|i| format!("{i},")).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let provider = Arc::new(ScriptedProvider::new().with_script(Script::text(&refs)));
        let (mut controller, _events) = controller_with(&provider, SessionSettings::default());

        controller.submit("count").expect("submit accepted");
        controller.run_until_idle().await;

        assert_eq!(
            controller.conversation().get(1).map(|m| m.content.clone()),
            Some(chunks.concat())
        );
    }

    #[tokio::test]
    async fn cancel_twice_matches_cancel_once() {
        let (script, feed) = Script::gated();
        let provider = Arc::new(ScriptedProvider::new().with_script(script));
        let (mut controller, mut events) = controller_with(&provider, settings());

        controller.submit("tell me a story").expect("submit accepted");
        feed.send(Ok(StreamChunk::new("Once"))).expect("feed open");
        feed.send(Ok(StreamChunk::new(" upon"))).expect("feed open");
        apply_until_content(&mut controller, 1, "Once upon").await;
        assert_eq!(controller.state(), SessionState::Streaming);

        assert!(controller.cancel());
        assert!(!controller.cancel());
        assert_eq!(controller.state(), SessionState::Streaming);
        assert_eq!(controller.submit("again"), Err(SubmitRejected::Busy));

        controller.run_until_idle().await;

        let message = controller.conversation().get(1).expect("assistant message");
        assert_eq!(message.content, GENERATION_STOPPED_MARKER);
        assert!(!message.thinking);
        assert_eq!(controller.last_outcome(), Some(GenerationOutcome::Cancelled));
        let ended = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, SessionEvent::GenerationEnded { .. }))
            .count();
        assert_eq!(ended, 1);
        assert!(!controller.cancel());
    }

    #[tokio::test]
    async fn cancel_before_first_chunk_writes_marker() {
        let (script, _feed) = Script::gated();
        let provider = Arc::new(ScriptedProvider::new().with_script(script));
        let (mut controller, _events) = controller_with(&provider, settings());

        controller.submit("hello").expect("submit accepted");
        assert!(controller.cancel());
        controller.run_until_idle().await;

        let message = controller.conversation().get(1).expect("assistant message");
        assert_eq!(message.content, GENERATION_STOPPED_MARKER);
        assert!(!message.thinking);
    }

    #[tokio::test]
    async fn cancel_when_idle_is_a_noop() {
        let provider = Arc::new(ScriptedProvider::new());
        let (mut controller, mut events) = controller_with(&provider, settings());

        assert!(!controller.cancel());
        assert!(drain(&mut events).is_empty());
        assert_eq!(controller.last_outcome(), None);
    }

    #[tokio::test]
    async fn rate_limit_is_reported_and_session_recovers() {
        let provider = Arc::new(ScriptedProvider::new().with_script(Script::Chunks(vec![
            Ok(StreamChunk::new("par")),
            Err(ProviderError::RateLimited("slow down".into())),
        ])));
        let (mut controller, _events) = controller_with(&provider, settings());

        controller.submit("hello").expect("submit accepted");
        controller.run_until_idle().await;

        let message = controller.conversation().get(1).expect("assistant message");
        assert!(message.content.contains("Rate limited"));
        assert!(!message.thinking);
        assert_eq!(
            controller.last_outcome(),
            Some(GenerationOutcome::Failed(ErrorKind::RateLimited))
        );
        assert_eq!(controller.state(), SessionState::Idle);

        provider.push(Script::text(&["recovered"]));
        controller.submit("again").expect("submit accepted after failure");
        controller.run_until_idle().await;
        assert_eq!(
            controller.conversation().get(3).map(|m| m.content.as_str()),
            Some("recovered")
        );
    }

    #[tokio::test]
    async fn open_failure_is_reported_inline() {
        let provider = Arc::new(
            ScriptedProvider::new().with_script(Script::OpenError(ProviderError::Auth(
                "401 Unauthorized".into(),
            ))),
        );
        let (mut controller, _events) = controller_with(&provider, settings());

        controller.submit("hello").expect("submit accepted");
        controller.run_until_idle().await;

        let message = controller.conversation().get(1).expect("assistant message");
        assert!(message.content.contains("Authentication failed"));
        assert!(message.content.contains("API key"));
        assert_eq!(
            controller.last_outcome(),
            Some(GenerationOutcome::Failed(ErrorKind::Auth))
        );
    }

    #[tokio::test]
    async fn context_excludes_placeholder_and_carries_history() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_script(Script::text(&["Hi there"]))
                .with_script(Script::text(&["Fine"])),
        );
        let settings = SessionSettings {
            system_prompt: Some("Be brief.".into()),
            ..settings()
        };
        let (mut controller, _events) = controller_with(&provider, settings);

        controller.submit("hello").expect("submit accepted");
        controller.run_until_idle().await;
        controller.submit("how are you?").expect("submit accepted");
        controller.run_until_idle().await;

        let requests = provider.requests();
        assert_eq!(
            requests[0],
            vec![
                ChatMessage::new("system", "Be brief."),
                ChatMessage::new("user", "hello"),
            ]
        );
        assert_eq!(
            requests[1],
            vec![
                ChatMessage::new("system", "Be brief."),
                ChatMessage::new("user", "hello"),
                ChatMessage::new("assistant", "Hi there"),
                ChatMessage::new("user", "how are you?"),
            ]
        );
    }

    #[tokio::test]
    async fn failed_replies_stay_in_later_context() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_script(Script::OpenError(ProviderError::Transport("refused".into())))
                .with_script(Script::text(&["ok"])),
        );
        let (mut controller, _events) = controller_with(&provider, settings());

        controller.submit("one").expect("submit accepted");
        controller.run_until_idle().await;
        controller.submit("two").expect("submit accepted");
        controller.run_until_idle().await;

        // The error summary is an assistant message like any other.
        let second = &provider.requests()[1];
        assert_eq!(second.len(), 3);
        assert!(second[1].content.contains("Network error"));
        assert_eq!(second[2], ChatMessage::new("user", "two"));
    }

    #[tokio::test]
    async fn stale_updates_are_ignored() {
        let (script, feed) = Script::gated();
        let provider = Arc::new(ScriptedProvider::new().with_script(script));
        let (mut controller, _events) = controller_with(&provider, settings());

        let id = controller.submit("hello").expect("submit accepted");
        controller.apply_update(GenerationUpdate::Content {
            id: GenerationId(id.0 + 100),
            text: "stale".into(),
        });
        let placeholder = controller.conversation().get(1).expect("placeholder");
        assert!(placeholder.content.is_empty());
        assert!(placeholder.thinking);

        drop(feed);
        controller.run_until_idle().await;
        assert_eq!(controller.last_outcome(), Some(GenerationOutcome::Completed));
    }

    #[tokio::test]
    async fn greeting_seeds_new_conversation() {
        let provider = Arc::new(ScriptedProvider::new().with_script(Script::text(&["sure"])));
        let settings = SessionSettings {
            greeting: Some("How can I help?".into()),
            ..settings()
        };
        let (mut controller, _events) = controller_with(&provider, settings);

        assert_eq!(controller.conversation().len(), 1);
        controller.submit("help").expect("submit accepted");
        controller.run_until_idle().await;

        assert_eq!(
            provider.requests()[0],
            vec![
                ChatMessage::new("assistant", "How can I help?"),
                ChatMessage::new("user", "help"),
            ]
        );
    }
}
