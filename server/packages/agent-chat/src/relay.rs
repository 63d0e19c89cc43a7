use std::convert::Infallible;
use std::time::{Duration, Instant};

use agent_chat_stream::{LineReader, SessionId, DATA_PREFIX};
use agent_chat_upstream::ByteStream;
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::Response;
use bytes::Bytes;
use futures::{Stream, StreamExt};

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub chunks: u64,
    pub bytes: u64,
    pub events: u64,
}

/// Wraps a live upstream reply in an SSE response.
///
/// The body pulls from `upstream` only when hyper polls it, so a slow
/// client never causes upstream bytes to pile up in memory.
pub fn relay_response(chat_id: SessionId, upstream: ByteStream) -> Response {
    let mut response = Response::new(Body::from_stream(relay_stream(chat_id, upstream)));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

/// Forwards every non-empty upstream chunk unchanged and ends on the first
/// read error or at end of stream.
pub fn relay_stream(
    chat_id: SessionId,
    upstream: ByteStream,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold(Relay::new(chat_id, upstream), |mut relay| async move {
        loop {
            match relay.upstream.next().await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    relay.observe(&chunk);
                    return Some((Ok(chunk), relay));
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        chat_id = %relay.chat_id,
                        error = %err,
                        error_type = err.error_type().as_str(),
                        bytes = relay.stats.bytes,
                        "upstream read failed mid-stream; closing relay"
                    );
                    relay.complete();
                    return None;
                }
                None => {
                    relay.complete();
                    return None;
                }
            }
        }
    })
}

struct Relay {
    chat_id: SessionId,
    upstream: ByteStream,
    observer: LineReader,
    stats: RelayStats,
    started: Instant,
    first_byte: Option<Duration>,
    completed: bool,
}

impl Relay {
    fn new(chat_id: SessionId, upstream: ByteStream) -> Self {
        Self {
            chat_id,
            upstream,
            observer: LineReader::new(),
            stats: RelayStats::default(),
            started: Instant::now(),
            first_byte: None,
            completed: false,
        }
    }

    fn observe(&mut self, chunk: &[u8]) {
        if self.first_byte.is_none() {
            let elapsed = self.started.elapsed();
            self.first_byte = Some(elapsed);
            tracing::debug!(
                chat_id = %self.chat_id,
                first_byte_ms = elapsed.as_millis() as u64,
                "first upstream chunk relayed"
            );
        }
        self.stats.chunks += 1;
        self.stats.bytes += chunk.len() as u64;

        let mut events = 0u64;
        self.observer.push(chunk, &mut |line: &str| {
            if line.starts_with(DATA_PREFIX) {
                events += 1;
            }
        });
        self.stats.events += events;
    }

    fn complete(&mut self) {
        self.completed = true;
        tracing::info!(
            chat_id = %self.chat_id,
            chunks = self.stats.chunks,
            bytes = self.stats.bytes,
            events = self.stats.events,
            first_byte_ms = self.first_byte.map(|d| d.as_millis() as u64),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "relay finished"
        );
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if !self.completed {
            tracing::debug!(
                chat_id = %self.chat_id,
                chunks = self.stats.chunks,
                bytes = self.stats.bytes,
                "client went away; dropping upstream stream"
            );
        }
    }
}
