//! Turns a chunk stream into ordered, optionally throttled text updates.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::provider::{ChunkStream, ProviderError, StreamPoll};

/// Default spacing between `on_append` notifications when throttled.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Receives aggregator callbacks. All calls happen on the task driving
/// [`StreamAggregator::consume`].
pub trait AggregatorSink {
    /// First non-empty chunk arrived; fires at most once.
    fn on_first_chunk(&mut self);
    /// Accumulated text so far.
    fn on_append(&mut self, full_text: &str);
    /// Stream ended normally; fires at most once.
    fn on_complete(&mut self, full_text: &str);
    /// Stream raised; nothing else fires afterwards.
    fn on_error(&mut self, error: &ProviderError);
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    Completed(String),
    /// Cancellation observed; no completion or error callback fired.
    Cancelled { partial: String },
    Failed(ProviderError),
}

/// Accumulates chunk text in arrival order.
///
/// Without a flush interval every chunk produces one `on_append`. With one,
/// `on_append` fires at most once per interval; text arriving in between is
/// flushed when the interval elapses or, at the latest, right before
/// `on_complete`. Throttling never changes the final text.
#[derive(Debug)]
pub struct StreamAggregator {
    flush_interval: Option<Duration>,
    buffer: String,
    received_first: bool,
    last_flush: Option<Instant>,
    dirty: bool,
}

impl Default for StreamAggregator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StreamAggregator {
    pub fn new(flush_interval: Option<Duration>) -> Self {
        Self {
            flush_interval: flush_interval.filter(|interval| !interval.is_zero()),
            buffer: String::new(),
            received_first: false,
            last_flush: None,
            dirty: false,
        }
    }

    pub fn throttled(interval: Duration) -> Self {
        Self::new(Some(interval))
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Drives `stream` to a terminal outcome, reporting through `sink`.
    pub async fn consume<S>(
        mut self,
        stream: &mut dyn ChunkStream,
        cancel: &CancellationToken,
        sink: &mut S,
    ) -> AggregateOutcome
    where
        S: AggregatorSink + ?Sized,
    {
        loop {
            let next = stream.next(cancel);
            tokio::pin!(next);

            let poll = loop {
                let deadline = self.flush_deadline();
                tokio::select! {
                    biased;
                    poll = &mut next => break poll,
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() =>
                    {
                        self.flush(sink);
                    }
                }
            };

            match poll {
                Ok(StreamPoll::Chunk(chunk)) => self.apply(&chunk.text, sink),
                Ok(StreamPoll::End) => {
                    if self.dirty {
                        self.flush(sink);
                    }
                    sink.on_complete(&self.buffer);
                    return AggregateOutcome::Completed(self.buffer);
                }
                Ok(StreamPoll::Cancelled) => {
                    return AggregateOutcome::Cancelled {
                        partial: self.buffer,
                    };
                }
                Err(ProviderError::Cancelled) => {
                    return AggregateOutcome::Cancelled {
                        partial: self.buffer,
                    };
                }
                Err(err) => {
                    sink.on_error(&err);
                    return AggregateOutcome::Failed(err);
                }
            }
        }
    }

    fn apply<S: AggregatorSink + ?Sized>(&mut self, text: &str, sink: &mut S) {
        if text.is_empty() {
            return;
        }
        if !self.received_first {
            self.received_first = true;
            sink.on_first_chunk();
        }
        self.buffer.push_str(text);

        let due = match (self.flush_interval, self.last_flush) {
            (Some(interval), Some(last)) => last.elapsed() >= interval,
            _ => true,
        };
        if due {
            self.flush(sink);
        } else {
            self.dirty = true;
        }
    }

    fn flush<S: AggregatorSink + ?Sized>(&mut self, sink: &mut S) {
        self.dirty = false;
        self.last_flush = Some(Instant::now());
        sink.on_append(&self.buffer);
    }

    /// When a throttled buffer holds unflushed text, the instant it is due.
    fn flush_deadline(&self) -> Option<Instant> {
        if !self.dirty {
            return None;
        }
        match (self.flush_interval, self.last_flush) {
            (Some(interval), Some(last)) => Some(last + interval),
            _ => Some(Instant::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::StreamChunk;
    use crate::utils::test_utils::{GatedStream, ScriptedStream};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        First,
        Append(String),
        Complete(String),
        Error(ProviderError),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl AggregatorSink for Recorder {
        fn on_first_chunk(&mut self) {
            self.events.push(Event::First);
        }
        fn on_append(&mut self, full_text: &str) {
            self.events.push(Event::Append(full_text.to_string()));
        }
        fn on_complete(&mut self, full_text: &str) {
            self.events.push(Event::Complete(full_text.to_string()));
        }
        fn on_error(&mut self, error: &ProviderError) {
            self.events.push(Event::Error(error.clone()));
        }
    }

    fn ok_chunks(texts: &[&str]) -> Vec<Result<StreamChunk, ProviderError>> {
        texts.iter().map(|t| Ok(StreamChunk::new(*t))).collect()
    }

    #[tokio::test]
    async fn unthrottled_appends_every_chunk_in_order() {
        let mut stream = ScriptedStream::new(ok_chunks(&["Hi", "", " there"]));
        let mut sink = Recorder::default();

        let outcome = StreamAggregator::default()
            .consume(&mut stream, &CancellationToken::new(), &mut sink)
            .await;

        assert_eq!(outcome, AggregateOutcome::Completed("Hi there".into()));
        assert_eq!(
            sink.events,
            vec![
                Event::First,
                Event::Append("Hi".into()),
                Event::Append("Hi there".into()),
                Event::Complete("Hi there".into()),
            ]
        );
    }

    #[tokio::test]
    async fn leading_empty_chunks_do_not_end_thinking() {
        let mut stream = ScriptedStream::new(ok_chunks(&["", ""]));
        let mut sink = Recorder::default();

        let outcome = StreamAggregator::default()
            .consume(&mut stream, &CancellationToken::new(), &mut sink)
            .await;

        assert_eq!(outcome, AggregateOutcome::Completed(String::new()));
        assert_eq!(sink.events, vec![Event::Complete(String::new())]);
    }

    #[tokio::test]
    async fn error_stops_further_callbacks() {
        let mut items = ok_chunks(&["partial"]);
        items.push(Err(ProviderError::RateLimited("slow".into())));
        items.extend(ok_chunks(&["never"]));
        let mut stream = ScriptedStream::new(items);
        let mut sink = Recorder::default();

        let outcome = StreamAggregator::default()
            .consume(&mut stream, &CancellationToken::new(), &mut sink)
            .await;

        assert_eq!(
            outcome,
            AggregateOutcome::Failed(ProviderError::RateLimited("slow".into()))
        );
        assert_eq!(
            sink.events.last(),
            Some(&Event::Error(ProviderError::RateLimited("slow".into())))
        );
        assert!(!sink.events.contains(&Event::Append("partialnever".into())));
    }

    #[tokio::test]
    async fn cancellation_fires_neither_complete_nor_error() {
        let (mut stream, feed) = GatedStream::new();
        let cancel = CancellationToken::new();
        let mut sink = Recorder::default();

        feed.send(Ok(StreamChunk::new("a"))).expect("feed open");
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let outcome = StreamAggregator::default()
            .consume(&mut stream, &cancel, &mut sink)
            .await;

        assert_eq!(outcome, AggregateOutcome::Cancelled { partial: "a".into() });
        assert_eq!(sink.events, vec![Event::First, Event::Append("a".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_appends_coalesce_within_interval() {
        let (mut stream, feed) = GatedStream::new();
        let cancel = CancellationToken::new();

        let producer = tokio::spawn(async move {
            for text in ["a", "b", "c"] {
                feed.send(Ok(StreamChunk::new(text))).expect("feed open");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            feed.send(Ok(StreamChunk::new("d"))).expect("feed open");
            // Dropping the feed ends the stream.
        });

        let mut sink = Recorder::default();
        let outcome = StreamAggregator::throttled(DEFAULT_FLUSH_INTERVAL)
            .consume(&mut stream, &cancel, &mut sink)
            .await;
        producer.await.expect("producer");

        assert_eq!(outcome, AggregateOutcome::Completed("abcd".into()));
        assert_eq!(
            sink.events,
            vec![
                Event::First,
                Event::Append("a".into()),
                Event::Append("abc".into()),
                Event::Append("abcd".into()),
                Event::Complete("abcd".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_tail_is_flushed_before_complete() {
        let mut stream = ScriptedStream::new(ok_chunks(&["x", "y", "z"]));
        let mut sink = Recorder::default();

        let outcome = StreamAggregator::throttled(Duration::from_secs(1))
            .consume(&mut stream, &CancellationToken::new(), &mut sink)
            .await;

        assert_eq!(outcome, AggregateOutcome::Completed("xyz".into()));
        assert_eq!(
            sink.events,
            vec![
                Event::First,
                Event::Append("x".into()),
                Event::Append("xyz".into()),
                Event::Complete("xyz".into()),
            ]
        );
    }
}
