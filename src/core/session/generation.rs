use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::GenerationId;
use crate::api::ChatMessage;
use crate::core::aggregator::{AggregateOutcome, AggregatorSink, StreamAggregator};
use crate::core::provider::{ChatProvider, ProviderError, ProviderOptions};

/// Message from a generation task back to the session owner.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationUpdate {
    FirstChunk {
        id: GenerationId,
    },
    Content {
        id: GenerationId,
        text: String,
    },
    Finished {
        id: GenerationId,
        outcome: AggregateOutcome,
    },
}

impl GenerationUpdate {
    pub fn id(&self) -> GenerationId {
        match self {
            GenerationUpdate::FirstChunk { id }
            | GenerationUpdate::Content { id, .. }
            | GenerationUpdate::Finished { id, .. } => *id,
        }
    }
}

pub(super) struct GenerationRequest {
    pub id: GenerationId,
    pub messages: Vec<ChatMessage>,
    pub options: ProviderOptions,
    pub cancel: CancellationToken,
    pub flush_interval: Option<Duration>,
}

/// Forwards aggregator callbacks to the owner instead of touching
/// conversation state from the generation task.
struct ChannelSink {
    id: GenerationId,
    tx: mpsc::UnboundedSender<GenerationUpdate>,
}

impl AggregatorSink for ChannelSink {
    fn on_first_chunk(&mut self) {
        let _ = self.tx.send(GenerationUpdate::FirstChunk { id: self.id });
    }

    fn on_append(&mut self, full_text: &str) {
        let _ = self.tx.send(GenerationUpdate::Content {
            id: self.id,
            text: full_text.to_string(),
        });
    }

    fn on_complete(&mut self, _full_text: &str) {}

    fn on_error(&mut self, error: &ProviderError) {
        debug!(id = %self.id, %error, "generation stream failed");
    }
}

/// Opens the provider stream and drives it to a terminal outcome. Always
/// ends by sending exactly one `Finished` update.
pub(super) async fn run_generation(
    provider: Arc<dyn ChatProvider>,
    request: GenerationRequest,
    tx: mpsc::UnboundedSender<GenerationUpdate>,
) {
    let GenerationRequest {
        id,
        messages,
        options,
        cancel,
        flush_interval,
    } = request;

    let outcome = match provider
        .send_chat_stream(&messages, &options, &cancel)
        .await
    {
        Ok(mut stream) => {
            let mut sink = ChannelSink { id, tx: tx.clone() };
            StreamAggregator::new(flush_interval)
                .consume(stream.as_mut(), &cancel, &mut sink)
                .await
        }
        Err(ProviderError::Cancelled) => AggregateOutcome::Cancelled {
            partial: String::new(),
        },
        Err(err) => AggregateOutcome::Failed(err),
    };

    debug!(%id, ?outcome, "generation finished");
    let _ = tx.send(GenerationUpdate::Finished { id, outcome });
}
