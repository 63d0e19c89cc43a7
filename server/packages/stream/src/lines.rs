use futures::{Stream, StreamExt};

use crate::decoder::Utf8Decoder;

/// What to do with each complete line.
pub trait LineHandler {
    fn handle_line(&mut self, line: &str);
}

impl<F> LineHandler for F
where
    F: FnMut(&str),
{
    fn handle_line(&mut self, line: &str) {
        self(line)
    }
}

/// Splits an incrementally arriving byte stream into `\n`-terminated lines.
///
/// Text after the last newline stays buffered until more bytes arrive. When
/// the stream ends, [`LineReader::finish`] returns that unterminated tail so
/// the caller can drop it; it is never handed to a handler.
#[derive(Debug, Default)]
pub struct LineReader {
    decoder: Utf8Decoder,
    buffer: String,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    lines: u64,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns how many complete lines it produced.
    pub fn push<H>(&mut self, chunk: &[u8], handler: &mut H) -> usize
    where
        H: LineHandler + ?Sized,
    {
        let text = self.decoder.decode(chunk);
        self.buffer.push_str(&text);

        let Some(found) = self.buffer[self.scanned..].rfind('\n') else {
            self.scanned = self.buffer.len();
            return 0;
        };
        let last_newline = self.scanned + found;
        let remainder = self.buffer.split_off(last_newline + 1);
        self.scanned = remainder.len();
        let complete = std::mem::replace(&mut self.buffer, remainder);

        let mut count = 0;
        for line in complete[..last_newline].split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            handler.handle_line(line);
            count += 1;
        }
        self.lines += count as u64;
        count
    }

    /// Decoded text still waiting for a newline.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn lines_read(&self) -> u64 {
        self.lines
    }

    /// Ends the stream, returning the unterminated trailing text if any.
    pub fn finish(mut self) -> Option<String> {
        let flushed = self.decoder.finish();
        self.buffer.push_str(&flushed);
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub chunks: u64,
    pub bytes: u64,
    pub lines: u64,
}

/// Drains `stream` through `reader`, one chunk at a time, in arrival order.
///
/// Empty chunks are skipped. The first stream error is returned as is; lines
/// completed before it have already been handled.
pub async fn read_lines<S, B, E, H>(
    reader: &mut LineReader,
    stream: S,
    handler: &mut H,
) -> Result<ReadSummary, E>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    H: LineHandler + ?Sized,
{
    let mut summary = ReadSummary::default();
    futures::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let bytes = chunk.as_ref();
        if bytes.is_empty() {
            continue;
        }
        summary.chunks += 1;
        summary.bytes += bytes.len() as u64;
        summary.lines += reader.push(bytes, handler) as u64;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunks: &[&[u8]]) -> (Vec<String>, Option<String>) {
        let mut reader = LineReader::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            reader.push(chunk, &mut |line: &str| lines.push(line.to_string()));
        }
        (lines, reader.finish())
    }

    #[test]
    fn keeps_incomplete_line_buffered() {
        let mut reader = LineReader::new();
        let mut lines = Vec::new();
        let produced = reader.push(b"data: one\ndata: tw", &mut |line: &str| {
            lines.push(line.to_string())
        });
        assert_eq!(produced, 1);
        assert_eq!(lines, vec!["data: one"]);
        assert_eq!(reader.pending(), "data: tw");

        reader.push(b"o\n\n", &mut |line: &str| lines.push(line.to_string()));
        assert_eq!(lines, vec!["data: one", "data: two", ""]);
        assert_eq!(reader.pending(), "");
        assert_eq!(reader.lines_read(), 3);
    }

    #[test]
    fn unterminated_tail_is_returned_not_handled() {
        let (lines, tail) = collect(&[&b"a\nb\n"[..], &b"partial"[..]]);
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(tail.as_deref(), Some("partial"));

        let (_, tail) = collect(&[&b"a\n"[..]]);
        assert_eq!(tail, None);
    }

    #[test]
    fn long_line_is_scanned_once() {
        let mut reader = LineReader::new();
        let mut lines = Vec::new();
        for _ in 0..1000 {
            reader.push(b"xxxxxxxx", &mut |line: &str| lines.push(line.to_string()));
            assert_eq!(reader.scanned, reader.pending().len());
        }
        assert!(lines.is_empty());

        reader.push(b"x\nnext", &mut |line: &str| lines.push(line.to_string()));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 8001);
        assert_eq!(reader.pending(), "next");
        assert_eq!(reader.scanned, 4);
    }

    #[test]
    fn strips_carriage_returns() {
        let (lines, _) = collect(&[&b"data: x\r\n\r\n"[..]]);
        assert_eq!(lines, vec!["data: x", ""]);
    }

    #[test]
    fn splits_multibyte_across_chunks() {
        let bytes = "data: 日本\n".as_bytes();
        let (lines, tail) = collect(&[&bytes[..7], &bytes[7..]]);
        assert_eq!(lines, vec!["data: 日本"]);
        assert_eq!(tail, None);
    }

    #[tokio::test]
    async fn read_lines_skips_empty_chunks_and_stops_on_error() {
        let chunks: Vec<Result<Vec<u8>, &str>> = vec![
            Ok(b"one\n".to_vec()),
            Ok(Vec::new()),
            Ok(b"two\nthr".to_vec()),
            Err("connection reset"),
            Ok(b"ee\n".to_vec()),
        ];
        let mut reader = LineReader::new();
        let mut lines = Vec::new();
        let result = read_lines(
            &mut reader,
            futures::stream::iter(chunks),
            &mut |line: &str| lines.push(line.to_string()),
        )
        .await;
        assert_eq!(result, Err("connection reset"));
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(reader.pending(), "thr");
    }

    #[tokio::test]
    async fn read_lines_reports_totals() {
        let chunks: Vec<Result<&[u8], ()>> = vec![Ok(&b"a\nb"[..]), Ok(&b"\n"[..])];
        let mut reader = LineReader::new();
        let mut count = 0;
        let summary = read_lines(
            &mut reader,
            futures::stream::iter(chunks),
            &mut |_: &str| count += 1,
        )
        .await
        .expect("read");
        assert_eq!(
            summary,
            ReadSummary {
                chunks: 2,
                bytes: 4,
                lines: 2
            }
        );
        assert_eq!(count, 2);
    }
}
