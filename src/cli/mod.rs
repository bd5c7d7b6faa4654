//! Command-line interface parsing and handling
//!
//! This module parses command-line arguments, resolves configuration and
//! credentials, and dispatches to the chat REPL, the one-shot `say`
//! command, or configuration editing.

pub mod chat;
pub mod say;
pub mod settings;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::warn;

use crate::cli::chat::run_chat;
use crate::cli::say::run_say;
use crate::cli::settings::{print_config, set_value, unset_value};
use crate::core::config::Config;
use crate::core::keyring;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_DESCRIBE"),
    ", built ",
    env!("VERGEN_BUILD_DATE"),
    " with rustc ",
    env!("VERGEN_RUSTC_SEMVER"),
    ")"
);

#[derive(Parser)]
#[command(name = "parley")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "Stream chat completions from OpenAI-compatible APIs")]
#[command(
    long_about = "Parley is a terminal chat client that streams responses from OpenAI-compatible \
chat-completion APIs (OpenRouter by default).\n\n\
Environment Variables:\n\
  PARLEY_API_KEY    API key (falls back to OPENAI_API_KEY)\n\
  PARLEY_BASE_URL   API base URL (falls back to OPENAI_BASE_URL)\n\
  PARLEY_MODEL      Model identifier\n\
  PARLEY_LOG        Diagnostics filter, e.g. 'parley=debug' (default: warn)\n\n\
Controls (chat):\n\
  Enter             Send the message\n\
  Ctrl+C            Stop the response being generated, or quit when idle\n\
  /quit             Quit"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use for this run
    #[arg(short = 'm', long, global = true)]
    pub model: Option<String>,

    /// API base URL for this run
    #[arg(short = 'u', long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// API key for this run (prefer the keyring or PARLEY_API_KEY)
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// Append the conversation to this file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Write diagnostics to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    pub debug_log: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Send a single prompt and print the reply
    Say {
        /// Wait for the full reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
        /// Prompt text
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Set a configuration value
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset a configuration value
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// Print the current configuration
    Config,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    crate::utils::logging::init_tracing(args.debug_log.as_deref())?;

    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    match args.command {
        Some(Commands::Set { ref key, ref value }) => {
            let message = set_value(key, value, args.base_url.as_deref())?;
            println!("✅ {message}");
            Ok(())
        }
        Some(Commands::Unset { ref key }) => {
            let message = unset_value(key, args.base_url.as_deref())?;
            println!("✅ {message}");
            Ok(())
        }
        Some(Commands::Config) => {
            print_config(&Config::load()?);
            Ok(())
        }
        Some(Commands::Say {
            no_stream,
            ref prompt,
        }) => {
            let session = resolve_session(&args)?;
            run_say(session, &prompt.join(" "), no_stream, args.log.clone()).await
        }
        Some(Commands::Chat) | None => {
            let session = resolve_session(&args)?;
            run_chat(session, args.log.clone()).await
        }
    }
}

/// Everything needed to talk to a provider, after flags, environment,
/// config file and keyring have been consulted.
pub struct ResolvedSession {
    pub config: Config,
    pub base_url: String,
    pub api_key: Option<String>,
}

fn resolve_session(args: &Args) -> Result<ResolvedSession, Box<dyn Error>> {
    let mut config = Config::load()?;
    config.apply_env_overrides(|name| std::env::var(name).ok());
    if let Some(model) = &args.model {
        config.model = Some(model.clone());
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = Some(base_url.clone());
    }

    let base_url = config.base_url();
    let api_key = resolve_api_key(args.api_key.clone(), &config, &base_url);
    Ok(ResolvedSession {
        config,
        base_url,
        api_key,
    })
}

/// Flag, then environment or config file (already merged), then keyring.
fn resolve_api_key(flag: Option<String>, config: &Config, base_url: &str) -> Option<String> {
    let direct = flag
        .or_else(|| config.api_key.clone())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());
    if direct.is_some() {
        return direct;
    }

    match keyring::get_api_key(base_url) {
        Ok(key) => key,
        Err(err) => {
            warn!(%err, recoverable = err.is_recoverable(), "keyring lookup failed");
            None
        }
    }
}
