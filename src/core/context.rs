//! History window construction for outgoing provider requests.

use crate::api::ChatMessage;
use crate::core::message::{Message, Role};

/// Number of most recent messages (not exchanges) sent as history.
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Builds the bounded message list sent to the provider.
///
/// Selects the most recent `max_messages` user/assistant messages that have
/// content and are not thinking placeholders, then guarantees that
/// `current_user_text` is the final entry exactly once. When the current turn
/// has to be appended, the oldest selected entry gives way so the window
/// never exceeds `max_messages` (minimum one).
pub fn build_context<'a, I>(
    history: I,
    current_user_text: &str,
    max_messages: usize,
) -> Vec<ChatMessage>
where
    I: IntoIterator<Item = &'a Message>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut window: Vec<ChatMessage> = history
        .into_iter()
        .rev()
        .filter(|message| is_eligible(message))
        .take(max_messages)
        .map(|message| ChatMessage::new(message.role.as_str(), message.content.clone()))
        .collect();
    window.reverse();

    let current_present = window
        .last()
        .map(|last| last.role == Role::User.as_str() && last.content == current_user_text)
        .unwrap_or(false);
    if !current_present {
        let overflow = (window.len() + 1).saturating_sub(max_messages.max(1));
        window.drain(..overflow);
        window.push(ChatMessage::new(Role::User.as_str(), current_user_text));
    }

    window
}

/// Prepends an optional system prompt to an already built window.
pub fn with_system_prompt(
    mut window: Vec<ChatMessage>,
    system_prompt: Option<&str>,
) -> Vec<ChatMessage> {
    if let Some(prompt) = system_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        window.insert(0, ChatMessage::new(Role::System.as_str(), prompt));
    }
    window
}

fn is_eligible(message: &Message) -> bool {
    message.role.is_conversational() && !message.thinking && !message.content.is_empty()
}
