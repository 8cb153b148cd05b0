pub mod openai;

use async_trait::async_trait;
use futures::{ Future, Stream };
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use self::openai::OpenAIChatClient;
use super::{ GenerationOptions, LlmConfig };
use crate::error::UpstreamError;
use crate::models::chat::ChatMessage;

/// Incremental text units produced by an upstream provider, in order.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

/// Capability to generate a completion stream for a message history.
///
/// `stream_chat` resolves once the provider has accepted the request, so
/// failures it returns happen before any reply byte exists. Failures after that
/// point arrive as `Err` items on the stream. Dropping the stream cancels the
/// upstream request.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions
    ) -> Result<DeltaStream, UpstreamError>;

    fn provider(&self) -> String;
    fn get_model(&self) -> String;
    fn has_api_key(&self) -> bool;
}

/// Runs `response_fn` on its own task and exposes what it sends as a stream.
/// The task sees a closed sender as soon as the stream is dropped.
pub fn create_streaming_response<F, Fut>(response_fn: F) -> DeltaStream
    where
        F: FnOnce(mpsc::Sender<Result<String, UpstreamError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client = OpenAIChatClient::from_config(config)?;
    Ok(Arc::new(client))
}
