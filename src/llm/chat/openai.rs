use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::error::Error as StdError;
use tokio::sync::mpsc;

use super::{ create_streaming_response, ChatClient, DeltaStream };
use crate::codec::{ data_payload, LineBuffer };
use crate::error::{ UpstreamError, MISSING_API_KEY_CODE };
use crate::llm::{ GenerationOptions, LlmConfig, LlmType };
use crate::models::chat::ChatMessage;

/// Client for the OpenAI chat-completions API and compatible endpoints (Groq).
pub struct OpenAIChatClient {
    http: HttpClient,
    llm_type: LlmType,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
}

#[derive(Deserialize, Default)]
struct OpenAIDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIErrorEnvelope {
    error: OpenAIErrorBody,
}

#[derive(Deserialize)]
struct OpenAIErrorBody {
    message: Option<String>,
    code: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl OpenAIErrorBody {
    fn code(&self) -> Option<String> {
        match &self.code {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => self.kind.clone(),
        }
    }
}

/// One parsed line of the upstream event stream.
#[derive(Debug, PartialEq, Eq)]
enum UpstreamEvent {
    Delta(String),
    Finished,
}

impl OpenAIChatClient {
    pub fn new(
        llm_type: LlmType,
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| llm_type.default_model().to_string());
        let api_url = base_url.unwrap_or_else(|| llm_type.default_base_url().to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            llm_type,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: chat_model,
            base_url: api_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        if config.api_key.is_none() {
            warn!("No API key configured for {}; chat requests will be rejected", config.llm_type);
        }
        Self::new(
            config.llm_type,
            config.api_key.clone(),
            config.completion_model.clone(),
            config.base_url.clone()
        )
    }

    fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

fn error_from_body(status: u16, body: &str) -> UpstreamError {
    match serde_json::from_str::<OpenAIErrorEnvelope>(body) {
        Ok(envelope) =>
            UpstreamError::Http {
                status,
                code: envelope.error.code(),
                message: envelope.error.message
                    .clone()
                    .unwrap_or_else(|| format!("HTTP error: {}", status)),
            },
        Err(_) => {
            let text = body.trim();
            UpstreamError::Http {
                status,
                code: None,
                message: if text.is_empty() {
                    format!("HTTP error: {}", status)
                } else {
                    text.to_string()
                },
            }
        }
    }
}

/// Providers report some failures inside an otherwise successful stream.
fn error_from_stream(body: &OpenAIErrorBody) -> UpstreamError {
    let code = body.code();
    let label = code.clone().unwrap_or_default().to_lowercase();
    let status = if label.contains("quota") || label.contains("rate_limit") {
        429
    } else if label.contains("api_key") || label.contains("authentication") {
        401
    } else {
        502
    };
    UpstreamError::Http {
        status,
        code,
        message: body.message.clone().unwrap_or_else(|| "Upstream stream error".to_string()),
    }
}

fn parse_stream_line(line: &str) -> Result<Option<UpstreamEvent>, UpstreamError> {
    let data = match data_payload(line) {
        Some(d) if !d.is_empty() => d,
        _ => {
            return Ok(None);
        }
    };
    if data == "[DONE]" {
        return Ok(Some(UpstreamEvent::Finished));
    }
    let value: Value = serde_json
        ::from_str(data)
        .map_err(|e| UpstreamError::Protocol(format!("{} for data: {}", e, data)))?;
    if value.get("error").map_or(false, |e| !e.is_null()) {
        let envelope: OpenAIErrorEnvelope = serde_json
            ::from_value(value)
            .map_err(|e| UpstreamError::Protocol(e.to_string()))?;
        return Err(error_from_stream(&envelope.error));
    }
    let chunk: OpenAIStreamResponse = serde_json
        ::from_value(value)
        .map_err(|e| UpstreamError::Protocol(e.to_string()))?;
    let content: String = chunk.choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    if content.is_empty() {
        Ok(None)
    } else {
        Ok(Some(UpstreamEvent::Delta(content)))
    }
}

/// Forwards deltas from the upstream body until `[DONE]`, end of body, an
/// error, or the receiver going away.
async fn pump_event_stream(
    resp: reqwest::Response,
    tx: mpsc::Sender<Result<String, UpstreamError>>
) {
    let mut lines = LineBuffer::new();
    let mut stream = resp.bytes_stream();

    loop {
        let chunk_result = tokio::select! {
            _ = tx.closed() => {
                debug!("Delta receiver dropped; cancelling upstream request");
                return;
            }
            next = stream.next() => match next {
                Some(result) => result,
                None => break,
            },
        };
        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };
        debug!("Upstream raw chunk: {} bytes", chunk.len());
        let complete = match lines.push(&chunk) {
            Ok(complete) => complete,
            Err(e) => {
                let _ = tx.send(Err(UpstreamError::Protocol(e.to_string()))).await;
                return;
            }
        };
        for line in complete {
            match parse_stream_line(&line) {
                Ok(Some(UpstreamEvent::Delta(content))) => {
                    if tx.send(Ok(content)).await.is_err() {
                        debug!("Delta receiver dropped; abandoning upstream body");
                        return;
                    }
                }
                Ok(Some(UpstreamEvent::Finished)) => {
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
    }

    if let Some(line) = lines.finish() {
        match parse_stream_line(&line) {
            Ok(Some(UpstreamEvent::Delta(content))) => {
                let _ = tx.send(Ok(content)).await;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = tx.send(Err(e)).await;
            }
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions
    ) -> Result<DeltaStream, UpstreamError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| UpstreamError::Http {
            status: 401,
            code: Some(MISSING_API_KEY_CODE.to_string()),
            message: format!("No API key configured for {}", self.llm_type),
        })?;

        let req = OpenAIChatRequest {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: true,
        };

        info!(
            "Calling {} with model {} ({} messages)",
            self.llm_type,
            self.model,
            req.messages.len()
        );
        let resp = self.http.post(self.completions_url()).bearer_auth(api_key).json(&req).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), &body));
        }

        Ok(create_streaming_response(move |tx| pump_event_stream(resp, tx)))
    }

    fn provider(&self) -> String {
        self.llm_type.to_string()
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}
