use futures::Stream;

use crate::conversation::Conversation;
use crate::fragment::{parse_data_line, StreamFragment};
use crate::lines::{read_lines, LineHandler, LineReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Reading,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub lines: u64,
    pub events: u64,
    pub applied: u64,
    pub skipped: u64,
    pub tool_fragments: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub stats: ConsumerStats,
    pub text: String,
    pub dropped_tail_bytes: usize,
}

/// Folds one reply stream into a [`Conversation`].
///
/// Owns the line buffer and the running assistant text for exactly one
/// stream; create a new consumer per reply.
#[derive(Debug)]
pub struct StreamConsumer {
    reader: LineReader,
    accumulated: String,
    stats: ConsumerStats,
    state: ConsumerState,
}

impl Default for StreamConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self {
            reader: LineReader::new(),
            accumulated: String::new(),
            stats: ConsumerStats::default(),
            state: ConsumerState::Idle,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Assistant text applied so far in this stream.
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Applies every complete line in `chunk`. Returns the number of
    /// fragments whose content reached the conversation.
    pub fn consume_chunk(&mut self, chunk: &[u8], conversation: &mut Conversation) -> usize {
        if self.state == ConsumerState::Done {
            tracing::debug!(bytes = chunk.len(), "consumer already finished; ignoring chunk");
            return 0;
        }
        self.state = ConsumerState::Reading;

        let mut applier = FragmentApplier {
            accumulated: &mut self.accumulated,
            stats: &mut self.stats,
            conversation,
            applied: 0,
        };
        self.reader.push(chunk, &mut applier);
        applier.applied
    }

    /// Marks the stream as ended. Any unterminated trailing line is dropped.
    pub fn finish(&mut self) -> ConsumerReport {
        self.state = ConsumerState::Done;
        let reader = std::mem::take(&mut self.reader);
        let dropped_tail_bytes = match reader.finish() {
            Some(tail) => {
                tracing::debug!(
                    bytes = tail.len(),
                    "dropping unterminated trailing line at end of stream"
                );
                tail.len()
            }
            None => 0,
        };
        ConsumerReport {
            stats: self.stats,
            text: self.accumulated.clone(),
            dropped_tail_bytes,
        }
    }

    /// Reads `stream` to the end and applies it to `conversation`.
    ///
    /// A read error stops consumption; content applied before it stays in the
    /// conversation.
    pub async fn consume_stream<S, B, E>(
        mut self,
        stream: S,
        conversation: &mut Conversation,
    ) -> Result<ConsumerReport, E>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
    {
        self.state = ConsumerState::Reading;
        {
            let mut applier = FragmentApplier {
                accumulated: &mut self.accumulated,
                stats: &mut self.stats,
                conversation,
                applied: 0,
            };
            read_lines(&mut self.reader, stream, &mut applier).await?;
        }
        Ok(self.finish())
    }
}

struct FragmentApplier<'a> {
    accumulated: &'a mut String,
    stats: &'a mut ConsumerStats,
    conversation: &'a mut Conversation,
    applied: usize,
}

impl LineHandler for FragmentApplier<'_> {
    fn handle_line(&mut self, line: &str) {
        self.stats.lines += 1;
        let Some(parsed) = parse_data_line(line) else {
            return;
        };
        self.stats.events += 1;

        let fragment = match parsed {
            Ok(fragment) => fragment,
            Err(err) => {
                self.stats.skipped += 1;
                tracing::debug!(error = %err, line_bytes = line.len(), "skipping malformed stream fragment");
                return;
            }
        };

        if fragment.has_tool_activity() {
            self.stats.tool_fragments += 1;
            log_tool_activity(&fragment);
        }

        let Some(text) = fragment.text() else {
            return;
        };
        self.accumulated.push_str(text);
        self.conversation.append_or_extend_assistant_turn(text);
        self.stats.applied += 1;
        self.applied += 1;
    }
}

fn log_tool_activity(fragment: &StreamFragment) {
    if let Some(call) = fragment.tool_call_info() {
        tracing::debug!(
            tool_call_id = %call.id,
            function_name = %call.function_name,
            target_agent = call.target_agent.as_ref().map(|agent| agent.name.as_str()),
            "agent called a tool"
        );
    } else if fragment.tool_call.is_some() {
        tracing::debug!("tool call with unrecognised shape");
    }

    if let Some(result) = fragment.tool_result_info() {
        tracing::debug!(
            tool_call_id = %result.id,
            status = %result.status,
            result_bytes = result.content.len(),
            "tool returned"
        );
    } else if fragment.tool.is_some() {
        tracing::debug!("tool result with unrecognised shape");
    }
}
