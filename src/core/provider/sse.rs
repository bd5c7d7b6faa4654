//! Server-sent event decoding for streaming chat completions.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use memchr::memchr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{format_api_error, ChunkStream, ProviderError, StreamChunk, StreamPoll};
use crate::api::ChatResponse;

/// What a single `data:` line contributes to the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
    Error(ProviderError),
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn handle_data_payload(payload: &str) -> Option<SseEvent> {
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    if payload.trim().is_empty() {
        return None;
    }

    let value = match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => value,
        Err(_) => return Some(SseEvent::Error(ProviderError::Provider(format_api_error(payload)))),
    };
    if value.get("error").is_some() {
        return Some(SseEvent::Error(ProviderError::from_stream_payload(payload)));
    }

    match serde_json::from_value::<ChatResponse>(value) {
        Ok(response) => response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseEvent::Delta),
        Err(_) => Some(SseEvent::Error(ProviderError::Provider(format_api_error(payload)))),
    }
}

/// Decodes one trimmed line. Comments, event names and deltas without
/// content yield `None`.
pub fn decode_line(line: &str) -> Option<SseEvent> {
    extract_data_payload(line).and_then(handle_data_payload)
}

/// Accumulates raw body bytes and hands out complete lines.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line, trimmed. Lines that are not valid UTF-8 are
    /// dropped with a warning.
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            match std::str::from_utf8(&line) {
                Ok(text) => return Some(text.trim().to_string()),
                Err(err) => warn!("Invalid UTF-8 in stream: {err}"),
            }
        }
        None
    }

    /// Whatever is left once the body has ended without a final newline.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        match String::from_utf8(rest) {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(err) => {
                warn!("Invalid UTF-8 at end of stream: {err}");
                None
            }
        }
    }
}

/// [`ChunkStream`] over an SSE response body.
///
/// Deltas decoded before an error are handed out before the error itself.
/// Once cancelled, the stream stays cancelled.
pub struct SseChunkStream {
    body: BoxStream<'static, Result<Vec<u8>, ProviderError>>,
    lines: SseLineBuffer,
    pending: VecDeque<String>,
    pending_error: Option<ProviderError>,
    finished: bool,
    cancelled: bool,
}

impl SseChunkStream {
    pub fn new(body: BoxStream<'static, Result<Vec<u8>, ProviderError>>) -> Self {
        Self {
            body,
            lines: SseLineBuffer::default(),
            pending: VecDeque::new(),
            pending_error: None,
            finished: false,
            cancelled: false,
        }
    }

    fn process_line(&mut self, line: &str) {
        match decode_line(line) {
            Some(SseEvent::Delta(text)) => self.pending.push_back(text),
            Some(SseEvent::Done) => {
                debug!("stream reported [DONE]");
                self.finished = true;
            }
            Some(SseEvent::Error(err)) => {
                self.finished = true;
                self.pending_error = Some(err);
            }
            None => {}
        }
    }

    fn drain_lines(&mut self) {
        while !self.finished {
            let Some(line) = self.lines.next_line() else {
                break;
            };
            self.process_line(&line);
        }
    }

    fn mark_cancelled(&mut self) -> Result<StreamPoll, ProviderError> {
        self.cancelled = true;
        self.finished = true;
        self.pending.clear();
        self.pending_error = None;
        Ok(StreamPoll::Cancelled)
    }
}

#[async_trait]
impl ChunkStream for SseChunkStream {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<StreamPoll, ProviderError> {
        loop {
            if self.cancelled || cancel.is_cancelled() {
                return self.mark_cancelled();
            }
            if let Some(text) = self.pending.pop_front() {
                return Ok(StreamPoll::Chunk(StreamChunk::new(text)));
            }
            if let Some(err) = self.pending_error.take() {
                return Err(err);
            }
            if self.finished {
                return Ok(StreamPoll::End);
            }

            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.mark_cancelled(),
                item = self.body.next() => item,
            };

            match item {
                Some(Ok(bytes)) => {
                    self.lines.push(&bytes);
                    self.drain_lines();
                }
                Some(Err(err)) => {
                    self.finished = true;
                    self.pending_error = Some(err);
                }
                None => {
                    if let Some(rest) = self.lines.take_remainder() {
                        self.process_line(&rest);
                    }
                    self.finished = true;
                }
            }
        }
    }
}
