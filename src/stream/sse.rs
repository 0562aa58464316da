//! Server-Sent Events framing for the event stream.

use tracing::warn;

use crate::types::Event;

/// Data payload marking the orderly end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(Box<Event>),
    Done,
}

/// Longest line the decoder buffers before giving up on it.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Incremental SSE decoder.
///
/// Feed raw body chunks with [`push`](Self::push); complete `data:` payloads
/// come out once their terminating blank line arrives. Multiple `data:`
/// lines in one frame are joined with `\n`. Comment lines (`:`) and other
/// SSE fields (`event:`, `id:`, `retry:`) are ignored. Bytes are buffered
/// until a full line is available, so multi-byte characters may straddle
/// chunk boundaries.
///
/// A line longer than the cap is discarded along with the frame it belongs
/// to; decoding resumes at the next frame.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    data_lines: Vec<String>,
    max_line: usize,
    // Inside an oversized line; skip up to its newline.
    oversized: bool,
    // The current frame lost a line; drop it at the blank line.
    drop_frame: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            data_lines: Vec::new(),
            max_line,
            oversized: false,
            drop_frame: false,
        }
    }

    /// Consume a chunk and return every payload it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            if std::mem::take(&mut self.oversized) {
                start = end + 1;
                from = start;
                continue;
            }
            let raw = &self.buffer[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            if let Some(payload) = self.line(&line) {
                payloads.push(payload);
            }
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            warn!(
                bytes = self.buffer.len(),
                limit = self.max_line,
                "dropping oversized stream line"
            );
            self.buffer.clear();
            self.scanned = 0;
            self.oversized = true;
            self.drop_frame = true;
        }
        payloads
    }

    /// Flush a trailing frame left unterminated at end of body.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if !std::mem::take(&mut self.oversized) && !rest.is_empty() {
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(payload) = self.line(line.trim_end_matches('\r')) {
                return Some(payload);
            }
        }
        self.flush()
    }

    fn line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.flush();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
        None
    }

    fn flush(&mut self) -> Option<String> {
        if std::mem::take(&mut self.drop_frame) {
            self.data_lines.clear();
            return None;
        }
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(payload)
    }
}

/// Classify a complete data payload.
///
/// Returns `None` for frames that do not decode as an event envelope; those
/// are logged and skipped so one bad frame never ends the stream.
pub fn classify(data: &str) -> Option<Frame> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if data == DONE_SENTINEL {
        return Some(Frame::Done);
    }
    match Event::decode(data) {
        Ok(event) => Some(Frame::Event(Box::new(event))),
        Err(e) => {
            warn!(error = %e, frame = %truncate(data, 200), "dropping malformed stream frame");
            None
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
