use log::warn;
use serde::Deserialize;

use super::ClientError;
use crate::codec::{ decode_line, Decoded, LineBuffer };
use crate::models::chat::{ ChatReply, ConversationId };
use crate::models::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblerState {
    Idle,
    Receiving,
    Completed,
    Failed,
}

/// Rebuilds one reply from the raw bytes of an event stream.
///
/// Feed it chunks exactly as they come off the socket; frame boundaries do not
/// need to line up with chunk boundaries. `on_delta` sees each delta once, in
/// order.
#[derive(Debug)]
pub struct StreamReassembler {
    state: ReassemblerState,
    lines: LineBuffer,
    full_response: String,
    conversation_id: Option<ConversationId>,
    failure: Option<(String, Option<u16>)>,
}

impl StreamReassembler {
    /// `conversation_id` is the id sent with the request; a `Done` frame
    /// without one falls back to it.
    pub fn new(conversation_id: Option<ConversationId>) -> Self {
        Self {
            state: ReassemblerState::Idle,
            lines: LineBuffer::new(),
            full_response: String::new(),
            conversation_id,
            failure: None,
        }
    }

    pub fn state(&self) -> ReassemblerState {
        self.state
    }

    pub fn full_response(&self) -> &str {
        &self.full_response
    }

    /// Called once the response headers confirm an event stream.
    pub fn begin(&mut self) {
        if self.state == ReassemblerState::Idle {
            self.state = ReassemblerState::Receiving;
        }
    }

    /// Consumes one chunk. Returns the reply as soon as a `Done` frame is seen.
    pub fn feed<F: FnMut(&str)>(
        &mut self,
        chunk: &[u8],
        on_delta: &mut F
    ) -> Result<Option<ChatReply>, ClientError> {
        self.begin();
        if self.state == ReassemblerState::Completed {
            return Ok(None);
        }
        let lines = self.lines.push(chunk).map_err(|e| ClientError::Malformed(e.to_string()))?;
        for line in lines {
            if let Some(reply) = self.apply_line(&line, on_delta)? {
                return Ok(Some(reply));
            }
        }
        Ok(None)
    }

    /// Called when the response body ends. A stream that closes without a
    /// terminal frame resolves to whatever text arrived, unless an error frame
    /// was seen at any point.
    pub fn finish<F: FnMut(&str)>(mut self, on_delta: &mut F) -> Result<ChatReply, ClientError> {
        if self.state == ReassemblerState::Completed {
            return Ok(self.reply());
        }
        if let Some(line) = self.lines.finish() {
            if let Some(reply) = self.apply_line(&line, on_delta)? {
                return Ok(reply);
            }
        }
        if let Some((message, status)) = self.failure.take() {
            return Err(ClientError::Stream { message, status });
        }
        Ok(self.reply())
    }

    fn apply_line<F: FnMut(&str)>(
        &mut self,
        line: &str,
        on_delta: &mut F
    ) -> Result<Option<ChatReply>, ClientError> {
        let frames = match decode_line(line) {
            Decoded::Frames(frames) => frames,
            Decoded::Skip => {
                return Ok(None);
            }
            Decoded::Malformed(reason) => {
                if self.state == ReassemblerState::Failed {
                    return Err(ClientError::Malformed(reason));
                }
                warn!("Skipping invalid SSE JSON: {}", reason);
                return Ok(None);
            }
        };

        for frame in frames {
            if self.state == ReassemblerState::Failed {
                continue;
            }
            match frame {
                Frame::Delta { content } => {
                    self.full_response.push_str(&content);
                    on_delta(&content);
                }
                Frame::Error { message, status } => {
                    self.state = ReassemblerState::Failed;
                    self.failure = Some((message, status));
                }
                Frame::Done { conversation_id } => {
                    self.state = ReassemblerState::Completed;
                    if conversation_id.is_some() {
                        self.conversation_id = conversation_id;
                    }
                    return Ok(Some(self.reply()));
                }
            }
        }
        Ok(None)
    }

    fn reply(&self) -> ChatReply {
        ChatReply {
            response: self.full_response.clone(),
            conversation_id: self.conversation_id.clone(),
        }
    }
}

#[derive(Deserialize)]
struct PlainReply {
    #[serde(default)]
    response: Option<String>,
    #[serde(rename = "conversationId", default)]
    conversation_id: Option<ConversationId>,
}

/// Non-streaming fallback: the whole body is one JSON reply, delivered as a
/// single delta.
pub fn reply_from_json<F: FnMut(&str)>(
    body: &[u8],
    conversation_id: Option<ConversationId>,
    on_delta: &mut F
) -> Result<ChatReply, ClientError> {
    let plain: PlainReply = serde_json
        ::from_slice(body)
        .map_err(|e| ClientError::Malformed(format!("non-streaming reply: {}", e)))?;
    let response = plain.response.unwrap_or_default();
    if !response.is_empty() {
        on_delta(&response);
    }
    Ok(ChatReply {
        response,
        conversation_id: plain.conversation_id.or(conversation_id),
    })
}

#[derive(Deserialize)]
struct ErrorReply {
    message: Option<String>,
    error: Option<serde_json::Value>,
}

/// Builds the error for a response whose status already says it failed.
pub fn error_from_response(status: u16, reason: Option<&str>, body: &[u8]) -> ClientError {
    let parsed = serde_json::from_slice::<ErrorReply>(body).ok();
    let message = parsed
        .and_then(|e| {
            e.message.filter(|m| !m.is_empty()).or_else(|| {
                match e.error {
                    Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
                    _ => None,
                }
            })
        })
        .or_else(|| reason.map(str::to_string))
        .or_else(|| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() { None } else { Some(text) }
        })
        .unwrap_or_else(|| format!("Server error: {}", status));
    ClientError::Server { status, message }
}
