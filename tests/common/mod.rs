#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use chat_relay::error::UpstreamError;
use chat_relay::history::{ ConversationStore, MemoryConversationStore };
use chat_relay::llm::chat::{ create_streaming_response, ChatClient, DeltaStream };
use chat_relay::llm::GenerationOptions;
use chat_relay::models::chat::ChatMessage;
use chat_relay::relay::{ RelayConfig, RelaySession };
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Upstream stand-in that replays a fixed script for every request.
pub struct ScriptedClient {
    pub open_error: Option<UpstreamError>,
    pub items: Vec<Result<String, UpstreamError>>,
}

impl ScriptedClient {
    pub fn replying(parts: &[&str]) -> Self {
        Self {
            open_error: None,
            items: parts
                .iter()
                .map(|p| Ok(p.to_string()))
                .collect(),
        }
    }

    pub fn failing_mid_stream(items: Vec<Result<String, UpstreamError>>) -> Self {
        Self { open_error: None, items }
    }

    pub fn rejecting(err: UpstreamError) -> Self {
        Self { open_error: Some(err), items: Vec::new() }
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn stream_chat(
        &self,
        _messages: &[ChatMessage],
        _options: &GenerationOptions
    ) -> Result<DeltaStream, UpstreamError> {
        if let Some(e) = &self.open_error {
            return Err(e.clone());
        }
        let items = self.items.clone();
        Ok(
            create_streaming_response(move |tx| async move {
                for item in items {
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
            })
        )
    }

    fn provider(&self) -> String {
        "openai".to_string()
    }

    fn get_model(&self) -> String {
        "gpt-3.5-turbo".to_string()
    }

    fn has_api_key(&self) -> bool {
        true
    }
}

pub fn relay_with(client: Arc<dyn ChatClient>) -> (Arc<RelaySession>, Arc<dyn ConversationStore>) {
    let store: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new());
    let relay = Arc::new(RelaySession::new(store.clone(), client, RelayConfig::default()));
    (relay, store)
}

/// Serves `app` on an ephemeral loopback port.
pub async fn spawn_app(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test app");
    });
    addr
}

pub fn quota_error() -> UpstreamError {
    UpstreamError::Http {
        status: 429,
        code: Some("insufficient_quota".to_string()),
        message: "You exceeded your current quota".to_string(),
    }
}
