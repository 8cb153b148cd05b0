//! One request/response exchange between a client and the upstream provider.
//!
//! [`RelaySession::handle`] does everything that can still fail with a plain
//! HTTP status: validation, history bookkeeping and opening the upstream
//! stream. Once it returns a [`RelayStream`] the exchange only speaks in
//! frames, written by a spawned pump task in upstream order.

use futures::StreamExt;
use log::{ debug, error, info, warn };
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tokio_stream::wrappers::ReceiverStream;

use crate::codec;
use crate::error::{ classify, RelayError, UpstreamError };
use crate::history::{ build_prompt, ConversationStore };
use crate::llm::chat::{ ChatClient, DeltaStream };
use crate::llm::GenerationOptions;
use crate::models::chat::{ new_conversation_id, ChatMessage, ChatRequest, ConversationId };
use crate::models::frame::Frame;

const FRAME_CHANNEL_CAPACITY: usize = 32;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful and friendly AI assistant. Be concise, clear, and engaging. \
     Keep responses brief and to the point unless more detail is requested.";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub system_prompt: String,
    pub options: GenerationOptions,
    /// Most recent history messages sent upstream; 0 sends everything.
    pub history_limit: usize,
    /// Longest wait for the next upstream item; `None` waits indefinitely.
    pub upstream_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            options: GenerationOptions::default(),
            history_limit: 0,
            upstream_timeout: None,
        }
    }
}

#[derive(Clone)]
pub struct RelaySession {
    store: Arc<dyn ConversationStore>,
    chat_client: Arc<dyn ChatClient>,
    config: RelayConfig,
}

/// Frames of an exchange whose streaming headers may now be committed.
pub struct RelayStream {
    pub conversation_id: ConversationId,
    frames: mpsc::Receiver<Frame>,
}

impl RelayStream {
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Encoded wire text, one item per frame. Dropping it cancels the exchange.
    pub fn into_body_stream(
        self
    ) -> impl futures::Stream<Item = Result<String, Infallible>> + Send + 'static {
        ReceiverStream::new(self.frames).map(|frame| Ok(codec::encode(&frame)))
    }
}

impl RelaySession {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        chat_client: Arc<dyn ChatClient>,
        config: RelayConfig
    ) -> Self {
        Self { store, chat_client, config }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn chat_client(&self) -> &Arc<dyn ChatClient> {
        &self.chat_client
    }

    pub async fn handle(&self, request: ChatRequest) -> Result<RelayStream, RelayError> {
        let message = match request.message {
            Some(m) if !m.is_empty() => m,
            _ => {
                warn!("Rejecting chat request without a message");
                return Err(
                    RelayError::Validation("Message is required and must be a string".to_string())
                );
            }
        };
        let conversation_id = request.conversation_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_conversation_id);
        let provider = self.chat_client.provider();
        info!(
            "Received chat request: conversation={} provider={} chars={}",
            conversation_id,
            provider,
            message.chars().count()
        );

        let history = self.store.get(&conversation_id).await;
        let user_message = ChatMessage::user(message);
        self.store.append(&conversation_id, user_message.clone()).await;

        let mut context = history.messages;
        context.push(user_message);
        let prompt = build_prompt(&self.config.system_prompt, &context, self.config.history_limit);

        let opened = with_timeout(
            self.config.upstream_timeout,
            self.chat_client.stream_chat(&prompt, &self.config.options)
        ).await;
        let upstream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let err = classify(&provider, &e);
                error!("Upstream {} rejected conversation {}: {}", provider, conversation_id, e);
                return Err(err);
            }
            Err(_) => {
                error!("Upstream {} did not answer for conversation {}", provider, conversation_id);
                return Err(RelayError::Timeout);
            }
        };

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        tokio::spawn(
            pump_frames(
                self.store.clone(),
                provider,
                conversation_id.clone(),
                self.config.upstream_timeout,
                upstream,
                tx
            )
        );

        Ok(RelayStream {
            conversation_id,
            frames: rx,
        })
    }
}

async fn with_timeout<F: std::future::Future>(
    limit: Option<Duration>,
    fut: F
) -> Result<F::Output, Elapsed> {
    match limit {
        Some(d) => tokio::time::timeout(d, fut).await,
        None => Ok(fut.await),
    }
}

async fn pump_frames(
    store: Arc<dyn ConversationStore>,
    provider: String,
    conversation_id: ConversationId,
    timeout: Option<Duration>,
    mut upstream: DeltaStream,
    tx: mpsc::Sender<Frame>
) {
    let mut full_response = String::new();
    let mut chunk_count = 0usize;

    loop {
        let next: Result<Option<Result<String, UpstreamError>>, Elapsed> = tokio::select! {
            _ = tx.closed() => {
                warn!("Client disconnected from conversation {}; aborting upstream", conversation_id);
                return;
            }
            next = with_timeout(timeout, upstream.next()) => next,
        };

        match next {
            Ok(Some(Ok(delta))) => {
                if delta.is_empty() {
                    continue;
                }
                chunk_count += 1;
                full_response.push_str(&delta);
                if tx.send(Frame::Delta { content: delta }).await.is_err() {
                    warn!("Client disconnected from conversation {}; aborting upstream", conversation_id);
                    return;
                }
            }
            Ok(Some(Err(e))) => {
                let err = classify(&provider, &e);
                error!("Upstream {} failed mid-stream for {}: {}", provider, conversation_id, e);
                let _ = tx.send(err.to_frame()).await;
                return;
            }
            Ok(None) => {
                break;
            }
            Err(_) => {
                error!("Upstream {} stalled for conversation {}", provider, conversation_id);
                let _ = tx.send(RelayError::Timeout.to_frame()).await;
                return;
            }
        }
    }

    info!(
        "Stream complete for {}. Total chunks: {}, Response length: {}",
        conversation_id,
        chunk_count,
        full_response.len()
    );
    store.append(&conversation_id, ChatMessage::assistant(full_response)).await;
    if tx.send(Frame::done(conversation_id.clone())).await.is_err() {
        debug!("Client left before the done frame of {}", conversation_id);
    }
}
