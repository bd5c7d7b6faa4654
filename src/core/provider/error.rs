use std::error::Error;
use std::fmt;

use reqwest::StatusCode;

/// Coarse classification used to pick user-facing wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    RateLimited,
    Transport,
    Provider,
    Cancelled,
}

/// Failures surfaced by a [`super::ChatProvider`].
///
/// `Cancelled` is not a failure of the provider; it reports that the
/// caller's cancellation token fired while a request was in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Missing or rejected credential.
    Auth(String),
    /// HTTP 429 or an equivalent quota signal.
    RateLimited(String),
    /// Connection, timeout or body transfer failure.
    Transport(String),
    /// Anything else the provider reported, passed through.
    Provider(String),
    Cancelled,
}

const RATE_LIMIT_GUIDANCE: &str = "Rate limited: requests are too frequent.\n\n\
Possible causes:\n\
1. The free quota has been used up (daily limits apply)\n\
2. Too many requests were sent in a short time\n\n\
Suggestions:\n\
• Wait a few minutes and try again\n\
• Check quota usage in your provider dashboard\n\
• Consider switching to another model";

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Auth(_) => ErrorKind::Auth,
            ProviderError::RateLimited(_) => ErrorKind::RateLimited,
            ProviderError::Transport(_) => ErrorKind::Transport,
            ProviderError::Provider(_) => ErrorKind::Provider,
            ProviderError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }

    /// Wording written into the transcript when a generation fails.
    pub fn user_facing_summary(&self) -> String {
        match self {
            ProviderError::Auth(detail) => format!(
                "Authentication failed: {detail}\n\nCheck that your API key is set and valid for this provider."
            ),
            ProviderError::RateLimited(_) => RATE_LIMIT_GUIDANCE.to_string(),
            ProviderError::Transport(detail) => format!(
                "Network error: {detail}\n\nCheck your network connection and the configured base URL."
            ),
            ProviderError::Provider(detail) => format!("API call failed: {detail}"),
            ProviderError::Cancelled => "Request cancelled".to_string(),
        }
    }

    /// Maps a non-success HTTP status and its body.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProviderError::Auth(error_summary_or_status(body, status))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                ProviderError::RateLimited(error_summary_or_status(body, status))
            }
            _ => ProviderError::Provider(format_api_error(body)),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status, &err.to_string());
        }
        if err.is_decode() {
            return ProviderError::Provider(format_api_error(&err.to_string()));
        }
        ProviderError::Transport(describe_transport_error(&err))
    }

    /// Classifies an `{"error": ...}` object delivered inside a stream.
    pub fn from_stream_payload(payload: &str) -> Self {
        let code = serde_json::from_str::<serde_json::Value>(payload)
            .ok()
            .and_then(|value| value.pointer("/error/code").cloned())
            .and_then(|code| match code {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            });

        match code.and_then(|c| u16::try_from(c).ok()) {
            Some(code) => match StatusCode::from_u16(code) {
                Ok(status) => Self::from_status(status, payload),
                Err(_) => ProviderError::Provider(format_api_error(payload)),
            },
            None => ProviderError::Provider(format_api_error(payload)),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(detail) => write!(f, "authentication failed: {detail}"),
            ProviderError::RateLimited(detail) => write!(f, "rate limited: {detail}"),
            ProviderError::Transport(detail) => write!(f, "transport error: {detail}"),
            ProviderError::Provider(detail) => write!(f, "provider error: {detail}"),
            ProviderError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl Error for ProviderError {}

fn describe_transport_error(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn error_summary_or_status(body: &str, status: StatusCode) -> String {
    serde_json::from_str::<serde_json::Value>(body.trim())
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .filter(|summary| !summary.is_empty())
        .unwrap_or_else(|| status.to_string())
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Renders a raw provider error body for display, pretty-printing JSON.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            return match extract_error_summary(&json_value).filter(|s| !s.is_empty()) {
                Some(summary) => format!("API Error: {summary}\n```json\n{pretty_json}\n```"),
                None => format!("API Error:\n```json\n{pretty_json}\n```"),
            };
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{trimmed}\n```")
    } else {
        format!("API Error:\n```\n{trimmed}\n```")
    }
}
