//! Client for the hosted agent API: chat creation, streamed continuation,
//! and per-agent chat history.

pub mod client;
pub mod config;
pub mod history;

pub use client::{AgentClient, ByteStream};
pub use config::UpstreamConfig;
pub use history::{format_relative, parse_client_input, HistoryAttributes, HistoryItem};
