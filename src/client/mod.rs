pub mod reassembler;

use futures::StreamExt;
use log::{ debug, warn };
use reqwest::{ header::CONTENT_TYPE, Client as HttpClient, Response };
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::codec::EVENT_STREAM;
use crate::models::chat::{
    new_conversation_id,
    ChatReply,
    ChatRequest,
    ConversationId,
    HealthResponse,
    NewConversationResponse,
    ProviderInfo,
    StatusMessage,
};
use self::reassembler::{ error_from_response, reply_from_json, ReassemblerState, StreamReassembler };

#[derive(Debug, Error)]
pub enum ClientError {
    /// The relay refused the request before streaming began.
    #[error("{message}")] Server {
        status: u16,
        message: String,
    },
    /// The relay reported a failure inside the event stream.
    #[error("{message}")] Stream {
        message: String,
        status: Option<u16>,
    },
    #[error("malformed relay response: {0}")] Malformed(String),
    #[error("request to relay failed: {0}")] Http(#[from] reqwest::Error),
}

/// HTTP client for the relay's `/api` surface.
#[derive(Clone)]
pub struct RelayClient {
    http: HttpClient,
    base_url: String,
}

impl RelayClient {
    /// `base_url` is the API root, e.g. `http://localhost:5000/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(HttpClient::new(), base_url)
    }

    pub fn with_http(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends one user message and reassembles the streamed reply, calling
    /// `on_delta` with each fragment as it arrives. A conversation id is
    /// generated when none is given.
    pub async fn send_message<F: FnMut(&str)>(
        &self,
        message: &str,
        conversation_id: Option<&str>,
        mut on_delta: F
    ) -> Result<ChatReply, ClientError> {
        let conversation_id: ConversationId = conversation_id
            .map(str::to_string)
            .unwrap_or_else(new_conversation_id);
        let request = ChatRequest {
            message: Some(message.to_string()),
            conversation_id: Some(conversation_id.clone()),
        };

        let resp = self.http.post(self.url("/chat")).json(&request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(error_from_response(status.as_u16(), status.canonical_reason(), &body));
        }

        let streaming = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.contains(EVENT_STREAM));
        if !streaming {
            debug!("Relay answered without an event stream; reading JSON body");
            let body = resp.bytes().await?;
            return reply_from_json(&body, Some(conversation_id), &mut on_delta);
        }

        let mut reassembler = StreamReassembler::new(Some(conversation_id));
        reassembler.begin();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => {
                    if let Some(reply) = reassembler.feed(&chunk, &mut on_delta)? {
                        return Ok(reply);
                    }
                }
                Err(e) => {
                    if reassembler.state() == ReassemblerState::Failed {
                        break;
                    }
                    warn!("Event stream broke off: {}", e);
                    return Err(ClientError::Http(e));
                }
            }
        }
        reassembler.finish(&mut on_delta)
    }

    pub async fn new_conversation(&self) -> Result<ConversationId, ClientError> {
        let resp = self.http.post(self.url("/chat/new")).send().await?;
        let created: NewConversationResponse = read_json(resp).await?;
        Ok(created.conversation_id)
    }

    pub async fn clear_conversation(&self, conversation_id: &str) -> Result<String, ClientError> {
        let resp = self.http.delete(self.url(&format!("/chat/{}", conversation_id))).send().await?;
        let status: StatusMessage = read_json(resp).await?;
        Ok(status.message)
    }

    pub async fn provider_info(&self) -> Result<ProviderInfo, ClientError> {
        let resp = self.http.get(self.url("/chat/provider")).send().await?;
        read_json(resp).await
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let resp = self.http.get(self.url("/health")).send().await?;
        read_json(resp).await
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        return Err(error_from_response(status.as_u16(), status.canonical_reason(), &body));
    }
    serde_json::from_slice(&body).map_err(|e| ClientError::Malformed(e.to_string()))
}
