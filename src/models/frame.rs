use serde::Serialize;

use super::chat::ConversationId;

/// One unit of the streaming reply protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Delta {
        content: String,
    },
    Done {
        conversation_id: Option<ConversationId>,
    },
    Error {
        message: String,
        status: Option<u16>,
    },
}

impl Frame {
    pub fn delta(content: impl Into<String>) -> Self {
        Frame::Delta { content: content.into() }
    }

    pub fn done(conversation_id: impl Into<ConversationId>) -> Self {
        Frame::Done { conversation_id: Some(conversation_id.into()) }
    }

    pub fn error(message: impl Into<String>, status: u16) -> Self {
        Frame::Error { message: message.into(), status: Some(status) }
    }

    pub(crate) fn to_payload(&self) -> FramePayload {
        match self {
            Frame::Delta { content } =>
                FramePayload {
                    content: Some(content.clone()),
                    done: Some(false),
                    ..FramePayload::default()
                },
            Frame::Done { conversation_id } =>
                FramePayload {
                    done: Some(true),
                    conversation_id: conversation_id.clone(),
                    ..FramePayload::default()
                },
            Frame::Error { message, status } =>
                FramePayload {
                    error: Some(true),
                    message: Some(message.clone()),
                    status: *status,
                    done: Some(true),
                    ..FramePayload::default()
                },
        }
    }
}

/// The JSON object carried on each `data:` line.
#[derive(Clone, Debug, Default, Serialize)]
pub(crate) struct FramePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(rename = "conversationId", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}
