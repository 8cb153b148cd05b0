//! SSE wire codec for relay frames.
//!
//! Every frame travels as `data: <json>\n\n`. Readers feed raw bytes into a
//! [`LineBuffer`] and hand each complete line to [`decode_line`].

use log::warn;
use serde_json::Value;
use thiserror::Error;

use crate::models::frame::Frame;

pub const DATA_PREFIX: &str = "data:";
pub const EVENT_STREAM: &str = "text/event-stream";
/// Longest unterminated line a [`LineBuffer`] holds before giving up.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event stream line exceeds {limit} bytes without a newline")]
pub struct LineTooLong {
    pub limit: usize,
}

const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

/// Result of decoding one line of an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frames(Vec<Frame>),
    Skip,
    Malformed(String),
}

pub fn encode(frame: &Frame) -> String {
    // FramePayload only holds strings, bools and integers.
    let json = serde_json::to_string(&frame.to_payload()).unwrap_or_else(|e| {
        warn!("Failed to serialize frame payload: {}", e);
        String::from("{}")
    });
    format!("{} {}\n\n", DATA_PREFIX, json)
}

/// Returns the payload after the `data:` marker, or `None` for any other line.
pub fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(DATA_PREFIX)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest).trim())
}

pub fn decode_line(line: &str) -> Decoded {
    let payload = match data_payload(line) {
        Some(p) => p,
        None => {
            return Decoded::Skip;
        }
    };
    if payload.is_empty() || payload == "[DONE]" {
        return Decoded::Skip;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => decode_payload(&value),
        Err(e) => Decoded::Malformed(format!("{} in payload: {}", e, payload)),
    }
}

pub fn decode_payload(value: &Value) -> Decoded {
    let obj = match value.as_object() {
        Some(o) => o,
        None => {
            return Decoded::Malformed(format!("frame payload is not an object: {}", value));
        }
    };

    if obj.get("error").and_then(Value::as_bool) == Some(true) {
        let message = obj
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_ERROR_MESSAGE)
            .to_string();
        let status = obj
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok());
        return Decoded::Frames(vec![Frame::Error { message, status }]);
    }

    let mut frames = Vec::new();
    if let Some(content) = obj.get("content").and_then(Value::as_str) {
        frames.push(Frame::Delta { content: content.to_string() });
    }
    if obj.get("done").and_then(Value::as_bool) == Some(true) {
        let conversation_id = obj
            .get("conversationId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        frames.push(Frame::Done { conversation_id });
    }

    if frames.is_empty() {
        Decoded::Skip
    } else {
        Decoded::Frames(frames)
    }
}

/// Accumulates raw bytes and yields complete `\n`-terminated lines.
///
/// Bytes are only turned into text once a full line is present, so a
/// multi-byte character split across two reads survives intact.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
        }
    }

    /// Appends `chunk` and returns every line it completed. Fails once the
    /// unterminated remainder grows past the line limit; the buffer is then
    /// emptied.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, LineTooLong> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            lines.push(Self::to_line(&self.pending[start..end]));
            start = end + 1;
            self.scanned = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();

        if self.pending.len() > self.max_line {
            self.pending.clear();
            self.scanned = 0;
            return Err(LineTooLong { limit: self.max_line });
        }
        Ok(lines)
    }

    /// Flushes whatever unterminated line is left once input has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        self.scanned = 0;
        Some(Self::to_line(&raw))
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn to_line(raw: &[u8]) -> String {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        String::from_utf8_lossy(raw).into_owned()
    }
}
