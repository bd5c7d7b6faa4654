use crate::core::message::{Message, Role};
use std::error::Error;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the diagnostics filter directives.
pub const LOG_ENV: &str = "PARLEY_LOG";
const DEFAULT_FILTER: &str = "warn";

/// Installs the global tracing subscriber. Diagnostics go to stderr, or
/// to `debug_log` when given, filtered by `PARLEY_LOG` (default `warn`).
pub fn init_tracing(debug_log: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| DEFAULT_FILTER.into());

    match debug_log {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|err| -> Box<dyn Error> { err })?;
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|err| -> Box<dyn Error> { err })?;
        }
    }
    Ok(())
}

/// Appends finalized conversation turns to a plain-text file.
pub struct TranscriptLog {
    file_path: Option<PathBuf>,
}

impl TranscriptLog {
    pub fn disabled() -> Self {
        Self { file_path: None }
    }

    /// Verifies the file can be opened for appending before enabling.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, Box<dyn Error>> {
        let path = path.into();
        open_append(&path)?;
        Ok(Self {
            file_path: Some(path),
        })
    }

    /// Enabled when `path` is given, disabled otherwise.
    pub fn open(path: Option<PathBuf>) -> Result<Self, Box<dyn Error>> {
        match path {
            Some(path) => Self::new(path),
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.file_path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Writes one message. Thinking placeholders and system messages are
    /// skipped.
    pub fn log_message(&self, message: &Message) -> Result<(), Box<dyn Error>> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        if message.thinking {
            return Ok(());
        }
        let prefix = match message.role {
            Role::User => "You: ",
            Role::Assistant => "",
            Role::System => return Ok(()),
        };

        let mut writer = BufWriter::new(open_append(path)?);
        let mut lines = message.content.lines();
        if let Some(first) = lines.next() {
            writeln!(writer, "{prefix}{first}")?;
        }
        for line in lines {
            writeln!(writer, "{line}")?;
        }
        // Blank line between messages.
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn transcript_formats_user_and_assistant_turns() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("chat.log");
        let log = TranscriptLog::new(&path).expect("log opens");

        log.log_message(&Message::user("hello")).expect("write");
        log.log_message(&Message::thinking_placeholder()).expect("write");
        log.log_message(&Message::assistant("Hi\nthere")).expect("write");
        log.log_message(&Message::system("hidden")).expect("write");

        let contents = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(contents, "You: hello\n\nHi\nthere\n\n");
    }

    #[test]
    fn disabled_transcript_writes_nothing() {
        let log = TranscriptLog::disabled();
        assert!(!log.is_active());
        log.log_message(&Message::user("hello")).expect("noop");
    }

    #[test]
    fn unwritable_path_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let missing = dir.path().join("missing").join("chat.log");
        assert!(TranscriptLog::new(missing).is_err());
    }

    #[test]
    fn second_subscriber_install_reports_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let debug_log = dir.path().join("debug.log");
        let _ = init_tracing(Some(&debug_log));

        let err = init_tracing(None).expect_err("global subscriber already set");
        assert!(!err.to_string().is_empty());
    }
}
