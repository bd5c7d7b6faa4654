use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::aggregator::DEFAULT_FLUSH_INTERVAL;
use crate::core::auto_follow::{AutoFollow, DEFAULT_THRESHOLD};
use crate::core::context::DEFAULT_MAX_HISTORY;
use crate::core::provider::{
    ProviderOptions, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P,
};
use crate::core::session::SessionSettings;
use crate::utils::url::normalize_base_url;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-exp:free";

/// On-disk configuration. Every field is optional; accessors fill in the
/// built-in defaults.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Plain-text key; the OS keyring is preferred and consulted last.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Number of recent messages sent as history with each request
    pub history_messages: Option<usize>,
    /// Minimum spacing between streamed content updates; 0 disables
    /// throttling
    pub flush_interval_ms: Option<u64>,
    /// Distance from the bottom within which the transcript keeps following
    pub auto_follow_threshold: Option<f64>,
    pub system_prompt: Option<String>,
    /// Assistant message shown at the start of each new conversation
    pub greeting: Option<String>,
}

/// Environment variables consulted by [`Config::apply_env_overrides`].
pub const ENV_API_KEY: &str = "PARLEY_API_KEY";
pub const ENV_API_KEY_FALLBACK: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "PARLEY_BASE_URL";
pub const ENV_BASE_URL_FALLBACK: &str = "OPENAI_BASE_URL";
pub const ENV_MODEL: &str = "PARLEY_MODEL";

impl Config {
    pub fn base_url(&self) -> String {
        let configured = self
            .base_url
            .as_deref()
            .map(normalize_base_url)
            .filter(|url| !url.is_empty());
        configured.unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn model(&self) -> String {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_string()
    }

    pub fn auto_follow_threshold(&self) -> f64 {
        self.auto_follow_threshold.unwrap_or(DEFAULT_THRESHOLD)
    }

    /// Auto-follow policy for a presentation layer, using the configured
    /// threshold.
    pub fn auto_follow(&self) -> AutoFollow {
        AutoFollow::new(self.auto_follow_threshold())
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        match self.flush_interval_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => Some(DEFAULT_FLUSH_INTERVAL),
        }
    }

    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            model: self.model(),
            max_tokens: Some(self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            temperature: Some(self.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
            top_p: Some(self.top_p.unwrap_or(DEFAULT_TOP_P)),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_history: self.history_messages.unwrap_or(DEFAULT_MAX_HISTORY),
            flush_interval: self.flush_interval(),
            system_prompt: non_blank(self.system_prompt.as_deref()),
            greeting: non_blank(self.greeting.as_deref()),
        }
    }

    /// Overlays environment variables on top of file values. `lookup` is
    /// `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first_set = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        if let Some(key) = first_set(&[ENV_API_KEY, ENV_API_KEY_FALLBACK]) {
            self.api_key = Some(key);
        }
        if let Some(url) = first_set(&[ENV_BASE_URL, ENV_BASE_URL_FALLBACK]) {
            self.base_url = Some(url);
        }
        if let Some(model) = first_set(&[ENV_MODEL]) {
            self.model = Some(model);
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
