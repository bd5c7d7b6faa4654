//! `set`, `unset` and `config` commands.

use std::fmt;
use std::str::FromStr;

use crate::core::config::{path_display, Config, ConfigError};
use crate::core::keyring::{self, KeyringAccessError};

/// Errors that can occur when modifying configuration settings.
#[derive(Debug)]
pub enum SettingError {
    /// The provided setting key is not recognized.
    UnknownKey(String),
    /// No value was given to `set`.
    MissingValue {
        key: &'static str,
        example: &'static str,
    },
    /// The value could not be parsed for this key.
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
    Config(ConfigError),
    Keyring(KeyringAccessError),
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(
                f,
                "Unknown config key: {key} (known keys: {})",
                KEYS.iter().map(|k| k.name).collect::<Vec<_>>().join(", ")
            ),
            SettingError::MissingValue { key, example } => {
                write!(f, "No value given for {key}. Example: {example}")
            }
            SettingError::InvalidValue {
                key,
                value,
                expected,
            } => write!(f, "Invalid value for {key}: {value} (expected {expected})"),
            SettingError::Config(err) => write!(f, "{err}"),
            SettingError::Keyring(err) => write!(f, "Keyring error: {err}"),
        }
    }
}

impl std::error::Error for SettingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingError::Config(err) => Some(err),
            SettingError::Keyring(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for SettingError {
    fn from(err: ConfigError) -> Self {
        SettingError::Config(err)
    }
}

impl From<KeyringAccessError> for SettingError {
    fn from(err: KeyringAccessError) -> Self {
        SettingError::Keyring(err)
    }
}

struct Key {
    name: &'static str,
    example: &'static str,
}

const KEYS: &[Key] = &[
    Key {
        name: "api-key",
        example: "parley set api-key sk-...",
    },
    Key {
        name: "base-url",
        example: "parley set base-url https://api.openai.com/v1",
    },
    Key {
        name: "model",
        example: "parley set model openai/gpt-4o-mini",
    },
    Key {
        name: "max-tokens",
        example: "parley set max-tokens 2048",
    },
    Key {
        name: "temperature",
        example: "parley set temperature 0.3",
    },
    Key {
        name: "top-p",
        example: "parley set top-p 0.9",
    },
    Key {
        name: "history-messages",
        example: "parley set history-messages 20",
    },
    Key {
        name: "flush-interval-ms",
        example: "parley set flush-interval-ms 50",
    },
    Key {
        name: "auto-follow-threshold",
        example: "parley set auto-follow-threshold 80",
    },
    Key {
        name: "system-prompt",
        example: "parley set system-prompt You are concise.",
    },
    Key {
        name: "greeting",
        example: "parley set greeting Hello! How can I help?",
    },
];

fn lookup(key: &str) -> Result<&'static Key, SettingError> {
    KEYS.iter()
        .find(|k| k.name == key)
        .ok_or_else(|| SettingError::UnknownKey(key.to_string()))
}

fn parse<T: FromStr>(
    key: &'static str,
    value: &str,
    expected: &'static str,
) -> Result<T, SettingError> {
    value.parse().map_err(|_| SettingError::InvalidValue {
        key,
        value: value.to_string(),
        expected,
    })
}

/// Applies `key = value` to `config` without persisting. `api-key` is not
/// handled here since it lives in the keyring.
pub fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<(), SettingError> {
    let entry = lookup(key)?;
    let value = value.trim();
    if value.is_empty() {
        return Err(SettingError::MissingValue {
            key: entry.name,
            example: entry.example,
        });
    }

    match entry.name {
        "base-url" => config.base_url = Some(value.to_string()),
        "model" => config.model = Some(value.to_string()),
        "max-tokens" => config.max_tokens = Some(parse(entry.name, value, "a positive integer")?),
        "temperature" => {
            let temperature: f32 = parse(entry.name, value, "a number between 0 and 2")?;
            if !(0.0..=2.0).contains(&temperature) {
                return Err(SettingError::InvalidValue {
                    key: entry.name,
                    value: value.to_string(),
                    expected: "a number between 0 and 2",
                });
            }
            config.temperature = Some(temperature);
        }
        "top-p" => {
            let top_p: f32 = parse(entry.name, value, "a number between 0 and 1")?;
            if !(0.0..=1.0).contains(&top_p) {
                return Err(SettingError::InvalidValue {
                    key: entry.name,
                    value: value.to_string(),
                    expected: "a number between 0 and 1",
                });
            }
            config.top_p = Some(top_p);
        }
        "history-messages" => {
            config.history_messages = Some(parse(entry.name, value, "a non-negative integer")?)
        }
        "flush-interval-ms" => {
            config.flush_interval_ms = Some(parse(entry.name, value, "milliseconds (0 disables)")?)
        }
        "auto-follow-threshold" => {
            config.auto_follow_threshold = Some(parse(entry.name, value, "a number of pixels")?)
        }
        "system-prompt" => config.system_prompt = Some(value.to_string()),
        "greeting" => config.greeting = Some(value.to_string()),
        _ => return Err(SettingError::UnknownKey(key.to_string())),
    }
    Ok(())
}

pub fn clear_setting(config: &mut Config, key: &str) -> Result<(), SettingError> {
    match lookup(key)?.name {
        "base-url" => config.base_url = None,
        "model" => config.model = None,
        "max-tokens" => config.max_tokens = None,
        "temperature" => config.temperature = None,
        "top-p" => config.top_p = None,
        "history-messages" => config.history_messages = None,
        "flush-interval-ms" => config.flush_interval_ms = None,
        "auto-follow-threshold" => config.auto_follow_threshold = None,
        "system-prompt" => config.system_prompt = None,
        "greeting" => config.greeting = None,
        _ => return Err(SettingError::UnknownKey(key.to_string())),
    }
    Ok(())
}

/// `parley set`. The API key goes to the keyring under the host of the
/// effective base URL; everything else is saved to the config file.
pub fn set_value(
    key: &str,
    value: &[String],
    base_url_flag: Option<&str>,
) -> Result<String, SettingError> {
    let value = value.join(" ");
    let mut config = Config::load()?;

    if key == "api-key" {
        let entry = lookup(key)?;
        let api_key = value.trim();
        if api_key.is_empty() {
            return Err(SettingError::MissingValue {
                key: entry.name,
                example: entry.example,
            });
        }
        let base_url = effective_base_url(&mut config, base_url_flag);
        keyring::store_api_key(&base_url, api_key)?;
        return Ok(format!(
            "Stored API key for {} in the system keyring",
            keyring::account_for(&base_url)?
        ));
    }

    apply_setting(&mut config, key, &value)?;
    config.save()?;
    Ok(format!("Set {key} to: {}", value.trim()))
}

/// `parley unset`.
pub fn unset_value(key: &str, base_url_flag: Option<&str>) -> Result<String, SettingError> {
    let mut config = Config::load()?;

    if key == "api-key" {
        let base_url = effective_base_url(&mut config, base_url_flag);
        let existed = keyring::delete_api_key(&base_url)?;
        let account = keyring::account_for(&base_url)?;
        return Ok(if existed {
            format!("Removed API key for {account} from the system keyring")
        } else {
            format!("No API key stored for {account}")
        });
    }

    clear_setting(&mut config, key)?;
    config.save()?;
    Ok(format!("Unset {key}"))
}

fn effective_base_url(config: &mut Config, base_url_flag: Option<&str>) -> String {
    if let Some(url) = base_url_flag {
        config.base_url = Some(url.to_string());
    }
    config.base_url()
}

/// Lines shown by `parley config`.
pub fn format_config(config: &Config) -> Vec<String> {
    fn show<T: fmt::Display>(key: &str, value: Option<T>, default: impl fmt::Display) -> String {
        match value {
            Some(value) => format!("  {key}: {value}"),
            None => format!("  {key}: {default} (default)"),
        }
    }

    let settings = config.session_settings();
    vec![
        format!(
            "  api-key: {}",
            if config.api_key.is_some() {
                "(set in config file)"
            } else {
                "(keyring or environment)"
            }
        ),
        show("base-url", config.base_url.as_deref(), config.base_url()),
        show("model", config.model.as_deref(), config.model()),
        show("max-tokens", config.max_tokens, crate::core::provider::DEFAULT_MAX_TOKENS),
        show("temperature", config.temperature, crate::core::provider::DEFAULT_TEMPERATURE),
        show("top-p", config.top_p, crate::core::provider::DEFAULT_TOP_P),
        show("history-messages", config.history_messages, settings.max_history),
        show(
            "flush-interval-ms",
            config.flush_interval_ms,
            crate::core::aggregator::DEFAULT_FLUSH_INTERVAL.as_millis(),
        ),
        show(
            "auto-follow-threshold",
            config.auto_follow_threshold,
            config.auto_follow_threshold(),
        ),
        show("system-prompt", config.system_prompt.as_deref(), "(unset)"),
        show("greeting", config.greeting.as_deref(), "(unset)"),
    ]
}

pub fn print_config(config: &Config) {
    match Config::get_config_path() {
        Ok(path) => println!("Current configuration ({}):", path_display(path)),
        Err(_) => println!("Current configuration:"),
    }
    for line in format_config(config) {
        println!("{line}");
    }
}
