//! Provider client: typed chat-completion calls against an LLM API.
//!
//! [`ChatProvider`] is the seam the session controller talks to. The
//! production implementation is [`OpenAiClient`]; tests substitute a
//! scripted provider. Providers never retry and hold no conversation state.

mod error;
mod openai;
pub mod sse;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::ChatMessage;

pub use error::{format_api_error, ErrorKind, ProviderError};
pub use openai::OpenAiClient;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.95;

/// Pass-through sampling configuration for a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOptions {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl ProviderOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            temperature: Some(DEFAULT_TEMPERATURE),
            top_p: Some(DEFAULT_TOP_P),
        }
    }
}

/// A unit of streamed assistant text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub text: String,
}

impl StreamChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Result of pulling the next item from a [`ChunkStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPoll {
    Chunk(StreamChunk),
    End,
    Cancelled,
}

/// Pull-based, finite, non-restartable sequence of chunks.
///
/// `next` observes the cancellation token while suspended and reports
/// [`StreamPoll::Cancelled`] instead of an error. Once `End`, `Cancelled`
/// or an error has been returned the stream is spent.
#[async_trait]
pub trait ChunkStream: Send {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<StreamPoll, ProviderError>;
}

pub type BoxChunkStream = Box<dyn ChunkStream>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Non-streaming completion; returns the full assistant text.
    async fn send_chat(
        &self,
        messages: &[ChatMessage],
        options: &ProviderOptions,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError>;

    /// Streaming completion. Each call issues a new request.
    async fn send_chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ProviderOptions,
        cancel: &CancellationToken,
    ) -> Result<BoxChunkStream, ProviderError>;
}

/// The only request validation done client-side.
pub fn validate_request(
    messages: &[ChatMessage],
    options: &ProviderOptions,
) -> Result<(), ProviderError> {
    if options.model.trim().is_empty() {
        return Err(ProviderError::Provider("No model id configured".to_string()));
    }
    if messages.is_empty() {
        return Err(ProviderError::Provider(
            "Cannot send an empty message list".to_string(),
        ));
    }
    Ok(())
}
