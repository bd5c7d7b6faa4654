use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::ChatMessage;
use crate::core::provider::{
    BoxChunkStream, ChatProvider, ChunkStream, ProviderError, ProviderOptions, StreamChunk,
    StreamPoll,
};

pub type ChunkResult = Result<StreamChunk, ProviderError>;

/// Yields a fixed list of items, then `End`.
pub struct ScriptedStream {
    items: VecDeque<ChunkResult>,
    done: bool,
}

impl ScriptedStream {
    pub fn new(items: impl IntoIterator<Item = ChunkResult>) -> Self {
        Self {
            items: items.into_iter().collect(),
            done: false,
        }
    }
}

#[async_trait]
impl ChunkStream for ScriptedStream {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<StreamPoll, ProviderError> {
        if cancel.is_cancelled() {
            self.done = true;
            return Ok(StreamPoll::Cancelled);
        }
        if self.done {
            return Ok(StreamPoll::End);
        }
        // Let other tasks run between chunks like a real network stream.
        tokio::task::yield_now().await;
        match self.items.pop_front() {
            Some(Ok(chunk)) => Ok(StreamPoll::Chunk(chunk)),
            Some(Err(err)) => {
                self.done = true;
                Err(err)
            }
            None => {
                self.done = true;
                Ok(StreamPoll::End)
            }
        }
    }
}

/// Yields whatever the test feeds through the paired sender. Dropping the
/// sender ends the stream.
pub struct GatedStream {
    rx: mpsc::UnboundedReceiver<ChunkResult>,
}

impl GatedStream {
    pub fn new() -> (Self, mpsc::UnboundedSender<ChunkResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::from_receiver(rx), tx)
    }

    pub fn from_receiver(rx: mpsc::UnboundedReceiver<ChunkResult>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl ChunkStream for GatedStream {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<StreamPoll, ProviderError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(StreamPoll::Cancelled),
            item = self.rx.recv() => match item {
                Some(Ok(chunk)) => Ok(StreamPoll::Chunk(chunk)),
                Some(Err(err)) => Err(err),
                None => Ok(StreamPoll::End),
            },
        }
    }
}

/// One scripted reply of a [`ScriptedProvider`].
pub enum Script {
    Chunks(Vec<ChunkResult>),
    OpenError(ProviderError),
    Gated(mpsc::UnboundedReceiver<ChunkResult>),
}

impl Script {
    pub fn text(chunks: &[&str]) -> Self {
        Script::Chunks(chunks.iter().map(|t| Ok(StreamChunk::new(*t))).collect())
    }

    pub fn gated() -> (Self, mpsc::UnboundedSender<ChunkResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Script::Gated(rx), tx)
    }
}

/// Provider double that answers requests from a queue of scripts and
/// records every message list it was sent.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, script: Script) -> Self {
        self.push(script);
        self
    }

    pub fn push(&self, script: Script) {
        self.scripts
            .lock()
            .expect("scripts lock poisoned")
            .push_back(script);
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }

    fn next_script(&self, messages: &[ChatMessage]) -> Option<Script> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(messages.to_vec());
        self.scripts.lock().expect("scripts lock poisoned").pop_front()
    }
}

fn exhausted() -> ProviderError {
    ProviderError::Provider("no scripted response left".to_string())
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn send_chat(
        &self,
        messages: &[ChatMessage],
        _options: &ProviderOptions,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        match self.next_script(messages).ok_or_else(exhausted)? {
            Script::Chunks(items) => items
                .into_iter()
                .map(|item| item.map(|chunk| chunk.text))
                .collect(),
            Script::OpenError(err) => Err(err),
            Script::Gated(_) => Err(ProviderError::Provider(
                "gated scripts only support streaming".to_string(),
            )),
        }
    }

    async fn send_chat_stream(
        &self,
        messages: &[ChatMessage],
        _options: &ProviderOptions,
        cancel: &CancellationToken,
    ) -> Result<BoxChunkStream, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        match self.next_script(messages).ok_or_else(exhausted)? {
            Script::Chunks(items) => Ok(Box::new(ScriptedStream::new(items))),
            Script::OpenError(err) => Err(err),
            Script::Gated(rx) => Ok(Box::new(GatedStream::from_receiver(rx))),
        }
    }
}
