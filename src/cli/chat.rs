//! Interactive line-based chat loop

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::say::print_delta;
use crate::cli::ResolvedSession;
use crate::core::message::Message;
use crate::core::provider::OpenAiClient;
use crate::core::session::{
    GenerationOutcome, SessionController, SessionEvent, SessionHandle, SessionRuntime,
    SubmitRejected,
};
use crate::utils::logging::TranscriptLog;

pub async fn run_chat(
    session: ResolvedSession,
    log: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let transcript = TranscriptLog::open(log)?;

    let options = session.config.provider_options();
    eprintln!("📡 Model: {}", options.model);
    eprintln!("🌐 API endpoint: {}", session.base_url);
    if session.api_key.is_none() {
        eprintln!(
            "⚠️  No API key found. Set PARLEY_API_KEY or run 'parley set api-key <key>'."
        );
    }
    if let Some(path) = transcript.path() {
        eprintln!("📝 Logging to: {}", path.display());
    }
    eprintln!("💡 Ctrl+C stops a response; /quit or Ctrl+D exits");

    let client = OpenAiClient::new(session.base_url.clone(), session.api_key.clone());
    let (controller, mut events) =
        SessionController::new(Arc::new(client), options, session.config.session_settings());
    let (runtime, handle) = SessionRuntime::new(controller);
    let runtime_task = runtime.spawn();

    if let Some(snapshot) = handle.snapshot().await {
        for message in snapshot.conversation.iter() {
            println!("{}\n", message.content);
            log_or_warn(&transcript, message);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let text = line.trim_end();
        if matches!(text.trim(), "/quit" | "/exit") {
            break;
        }

        match handle.submit(text).await {
            Ok(_) => {}
            Err(SubmitRejected::Empty) => continue,
            Err(err) => {
                eprintln!("⚠️  {err}");
                continue;
            }
        }
        log_or_warn(&transcript, &Message::user(text));

        let outcome = stream_reply(&handle, &mut events, &transcript).await?;
        info!(?outcome, "turn finished");
    }

    println!();
    drop(handle);
    runtime_task.await?;
    Ok(())
}

/// Prints content updates until the generation ends. Ctrl+C requests a
/// stop; the loop keeps draining events until the runtime confirms it.
async fn stream_reply(
    handle: &SessionHandle,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    transcript: &TranscriptLog,
) -> Result<Option<GenerationOutcome>, Box<dyn Error>> {
    let mut printed = String::new();
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                handle.cancel().await;
                continue;
            }
        };

        match event {
            Some(SessionEvent::AssistantContentUpdated { text, .. }) => {
                print_delta(&mut printed, &text)?;
            }
            Some(SessionEvent::GenerationEnded {
                outcome, content, ..
            }) => {
                print_delta(&mut printed, &content)?;
                println!("\n");
                log_or_warn(transcript, &Message::assistant(content));
                return Ok(Some(outcome));
            }
            Some(_) => {}
            None => return Ok(None),
        }
    }
}

pub(crate) fn log_or_warn(transcript: &TranscriptLog, message: &Message) {
    if let Err(err) = transcript.log_message(message) {
        warn!(%err, "failed to write transcript");
    }
}
