//! Parley is a streaming chat client for OpenAI-compatible LLM APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the chat session engine: the provider client, history
//!   window construction, stream aggregation, the single-flight session
//!   controller, and the auto-follow presentation policy.
//! - [`api`] defines the chat-completions payloads exchanged with providers.
//! - [`cli`] hosts the engine in a terminal: an interactive chat loop, a
//!   one-shot `say` command, and configuration editing.
//! - [`utils`] holds URL, authentication-header, and logging helpers.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
