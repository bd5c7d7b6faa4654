//! One-shot "say" command

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::chat::log_or_warn;
use crate::cli::ResolvedSession;
use crate::core::config::Config;
use crate::core::context::{build_context, with_system_prompt};
use crate::core::message::Message;
use crate::core::provider::{ChatProvider, OpenAiClient};
use crate::core::session::{GenerationOutcome, SessionController, SessionEvent};
use crate::utils::logging::TranscriptLog;

pub async fn run_say(
    session: ResolvedSession,
    prompt: &str,
    no_stream: bool,
    log: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    if prompt.trim().is_empty() {
        eprintln!("Usage: parley say <prompt>");
        std::process::exit(1);
    }

    let transcript = TranscriptLog::open(log)?;
    let client = OpenAiClient::new(session.base_url.clone(), session.api_key.clone());
    let succeeded = if no_stream {
        say_blocking(&client, &session.config, prompt, &transcript).await
    } else {
        say_streaming(Arc::new(client), &session.config, prompt, &transcript).await?
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Streams the reply through a [`SessionController`], printing as content
/// arrives. Returns `false` when the generation failed.
async fn say_streaming(
    provider: Arc<dyn ChatProvider>,
    config: &Config,
    prompt: &str,
    transcript: &TranscriptLog,
) -> Result<bool, Box<dyn Error>> {
    let (mut controller, mut events) =
        SessionController::new(provider, config.provider_options(), config.session_settings());
    controller.submit(prompt)?;
    log_or_warn(transcript, &Message::user(prompt));

    let mut printed = String::new();
    let mut outcome = None;
    while outcome.is_none() {
        let Some(update) = controller.next_update().await else {
            break;
        };
        controller.apply_update(update);
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::AssistantContentUpdated { text, .. } => {
                    print_delta(&mut printed, &text)?;
                }
                SessionEvent::GenerationEnded {
                    outcome: ended,
                    content,
                    ..
                } => {
                    print_delta(&mut printed, &content)?;
                    log_or_warn(transcript, &Message::assistant(content));
                    outcome = Some(ended);
                }
                _ => {}
            }
        }
    }
    println!();

    Ok(!matches!(outcome, Some(GenerationOutcome::Failed(_))))
}

async fn say_blocking(
    provider: &dyn ChatProvider,
    config: &Config,
    prompt: &str,
    transcript: &TranscriptLog,
) -> bool {
    let settings = config.session_settings();
    let history: Vec<Message> = settings.greeting.iter().map(Message::assistant).collect();
    let messages = with_system_prompt(
        build_context(&history, prompt, settings.max_history),
        settings.system_prompt.as_deref(),
    );
    log_or_warn(transcript, &Message::user(prompt));

    match provider
        .send_chat(
            &messages,
            &config.provider_options(),
            &CancellationToken::new(),
        )
        .await
    {
        Ok(text) => {
            println!("{text}");
            log_or_warn(transcript, &Message::assistant(text));
            true
        }
        Err(err) => {
            let summary = err.user_facing_summary();
            eprintln!("❌ {summary}");
            log_or_warn(transcript, &Message::assistant(summary));
            false
        }
    }
}

/// Prints only what was appended since the last update. Replaced content
/// (error summaries, the stop marker) starts on a fresh line.
pub(crate) fn print_delta(printed: &mut String, text: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    match text.strip_prefix(printed.as_str()) {
        Some(delta) => write!(stdout, "{delta}")?,
        None => {
            if !printed.is_empty() {
                writeln!(stdout)?;
            }
            write!(stdout, "{text}")?;
        }
    }
    stdout.flush()?;
    printed.clear();
    printed.push_str(text);
    Ok(())
}
