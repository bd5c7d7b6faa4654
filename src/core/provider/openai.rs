use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::sse::SseChunkStream;
use super::{
    format_api_error, validate_request, BoxChunkStream, ChatProvider, ProviderError,
    ProviderOptions,
};
use crate::api::{ChatMessage, ChatRequest, CompletionResponse};
use crate::utils::auth::add_auth_headers;
use crate::utils::url::construct_api_url;

/// Client for OpenAI-style `chat/completions` endpoints (OpenAI,
/// OpenRouter, local gateways).
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        options: &ProviderOptions,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        validate_request(messages, options)?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("no API key configured".to_string()))?;

        let request = ChatRequest {
            model: options.model.clone(),
            messages: messages.to_vec(),
            stream,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
        };

        let chat_url = construct_api_url(&self.base_url, "chat/completions");
        let http_request = self
            .client
            .post(chat_url)
            .header("Content-Type", "application/json");
        let http_request = if stream {
            http_request.header("Accept", "text/event-stream")
        } else {
            http_request
        };

        Ok(add_auth_headers(http_request, api_key).json(&request))
    }

    /// Sends the request and checks the status, observing `cancel` while
    /// waiting for the response head.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = request.send() => result.map_err(ProviderError::from_reqwest)?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            body = response.text() => body.unwrap_or_else(|_| "<no body>".to_string()),
        };
        debug!(%status, "provider rejected request");
        Err(ProviderError::from_status(status, &body))
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    async fn send_chat(
        &self,
        messages: &[ChatMessage],
        options: &ProviderOptions,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        info!(model = %options.model, "sending chat request");
        let request = self.build_request(messages, options, false)?;
        let response = self.execute(request, cancel).await?;

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            body = response.text() => body.map_err(ProviderError::from_reqwest)?,
        };

        let completion: CompletionResponse = serde_json::from_str(&body)
            .map_err(|_| ProviderError::Provider(format_api_error(&body)))?;
        if let Some(usage) = completion.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat usage"
            );
        }

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        info!(length = content.len(), "received chat response");
        Ok(content)
    }

    async fn send_chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ProviderOptions,
        cancel: &CancellationToken,
    ) -> Result<BoxChunkStream, ProviderError> {
        debug!(model = %options.model, messages = messages.len(), "sending streaming chat request");
        let request = self.build_request(messages, options, true)?;
        let response = self.execute(request, cancel).await?;

        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(ProviderError::from_reqwest)
            })
            .boxed();
        Ok(Box::new(SseChunkStream::new(body)))
    }
}
