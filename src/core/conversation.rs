use std::collections::VecDeque;

use crate::core::message::Message;

/// Ordered transcript owned by the session controller.
///
/// Entries are never removed; truncation for the provider's context window
/// is a view built by [`crate::core::context::build_context`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: VecDeque<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> + ExactSizeIterator {
        self.messages.iter()
    }

    /// Appends a message and returns its index.
    pub(crate) fn push(&mut self, message: Message) -> usize {
        self.messages.push_back(message);
        self.messages.len() - 1
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }

    /// Everything except the entry at `index`; used to keep the thinking
    /// placeholder out of the outgoing context.
    pub(crate) fn iter_excluding(&self, index: usize) -> impl DoubleEndedIterator<Item = &Message> {
        self.messages
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != index)
            .map(|(_, message)| message)
    }
}

impl FromIterator<Message> for Conversation {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}
