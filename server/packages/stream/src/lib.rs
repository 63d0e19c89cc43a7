//! Incremental decoding of agent reply streams.
//!
//! The relay and the chat client both read the same `data: <json>` line
//! protocol. [`LineReader`] is the shared piece: it turns arbitrary byte
//! chunks into complete lines and hands each one to a [`LineHandler`].
//! [`StreamConsumer`] is the handler that parses fragments and folds them
//! into a [`Conversation`].

pub mod consumer;
pub mod conversation;
pub mod decoder;
pub mod fragment;
pub mod lines;

pub use consumer::{ConsumerReport, ConsumerState, ConsumerStats, StreamConsumer};
pub use conversation::{Conversation, Role, SessionId, Turn};
pub use decoder::Utf8Decoder;
pub use fragment::{parse_data_line, StreamFragment, TargetAgent, ToolCall, ToolResult, DATA_PREFIX};
pub use lines::{read_lines, LineHandler, LineReader, ReadSummary};
