pub mod aggregator;
pub mod auto_follow;
pub mod config;
pub mod context;
pub mod conversation;
pub mod keyring;
pub mod message;
pub mod provider;
pub mod session;
