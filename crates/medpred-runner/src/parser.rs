//! Incremental decoding of newline-delimited JSON worker output.

use std::collections::VecDeque;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::error::RunnerError;

const READ_BUF_SIZE: usize = 8 * 1024;
const PREVIEW_CHARS: usize = 200;

/// Splits raw output chunks into lines and decodes each line as JSON.
///
/// A trailing line without its newline is carried over to the next chunk, so
/// chunk boundaries never split or duplicate a value. Blank lines are skipped
/// and malformed lines are counted and dropped.
#[derive(Debug, Default)]
pub struct EventParser {
    carry: Vec<u8>,
    decoded: u64,
    malformed: u64,
}

impl EventParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every value completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.carry.extend_from_slice(chunk);

        let Some(last_newline) = self.carry.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);

        let mut events = Vec::new();
        for line in complete[..last_newline].split(|&b| b == b'\n') {
            if let Some(value) = self.decode_line(line) {
                events.push(value);
            }
        }
        events
    }

    /// Decode whatever is left once the stream has ended.
    ///
    /// Output that ends without a final newline still counts as a line.
    pub fn finish(&mut self) -> Option<Value> {
        let rest = std::mem::take(&mut self.carry);
        self.decode_line(&rest)
    }

    /// Bytes currently held back waiting for a newline.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    /// Number of lines decoded successfully so far.
    pub fn decoded_count(&self) -> u64 {
        self.decoded
    }

    /// Number of non-blank lines that failed to decode.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<Value> {
        let trimmed = trim_ascii_whitespace(line);
        if trimmed.is_empty() {
            return None;
        }

        match serde_json::from_slice::<Value>(trimmed) {
            Ok(value) => {
                self.decoded += 1;
                Some(value)
            }
            Err(e) => {
                self.malformed += 1;
                let preview: String = String::from_utf8_lossy(trimmed)
                    .chars()
                    .take(PREVIEW_CHARS)
                    .collect();
                warn!(error = %e, preview = %preview, "Discarding malformed worker output line");
                None
            }
        }
    }
}

fn trim_ascii_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// Lazy sequence of events decoded from one worker's stdout.
///
/// Reads the underlying stream only when no decoded event is pending. Not
/// restartable: once it returns `None` the stream is exhausted.
pub struct EventStream<R> {
    reader: R,
    parser: EventParser,
    pending: VecDeque<Value>,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> EventStream<R> {
    /// Wrap a byte stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: EventParser::new(),
            pending: VecDeque::new(),
            buf: vec![0; READ_BUF_SIZE],
            eof: false,
        }
    }

    /// Next decoded event, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Result<Option<Value>, RunnerError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                self.eof = true;
                if let Some(event) = self.parser.finish() {
                    self.pending.push_back(event);
                }
                debug!(
                    decoded = self.parser.decoded_count(),
                    malformed = self.parser.malformed_count(),
                    "Worker stdout closed (EOF)"
                );
                continue;
            }

            let events = self.parser.push(&self.buf[..n]);
            self.pending.extend(events);
        }
    }

    /// The underlying parser, for its counters.
    pub fn parser(&self) -> &EventParser {
        &self.parser
    }
}
