use clap::Parser;
use std::time::Duration;

use crate::llm::{ GenerationOptions, LlmConfig, LlmType };
use crate::relay::{ RelayConfig, DEFAULT_SYSTEM_PROMPT };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- History Store Args ---
    /// History chat store type (memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "memory")]
    pub history_type: String,

    /// Number of most recent history messages sent upstream. 0 sends the whole conversation.
    #[arg(long, env = "HISTORY_LIMIT", default_value = "0")]
    pub history_limit: usize,

    // --- Chat LLM Provider Args ---
    /// LLM provider for chat completion (openai, groq)
    #[arg(long, env = "AI_PROVIDER", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the provider API. Defaults to the provider's public endpoint.
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// API key for the provider. Falls back to OPENAI_API_KEY, then GROQ_API_KEY.
    #[arg(long, env = "AI_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion. Groq also honours GROQ_MODEL.
    #[arg(long, env = "CHAT_MODEL")]
    pub chat_model: Option<String>,

    /// System preamble placed before every conversation.
    #[arg(long, env = "SYSTEM_PROMPT", default_value = DEFAULT_SYSTEM_PROMPT)]
    pub system_prompt: String,

    /// Sampling temperature for generation.
    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    /// Upper bound on generated tokens per reply.
    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "500")]
    pub max_tokens: u32,

    /// Seconds to wait for the next upstream chunk before failing the exchange. 0 waits forever.
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value = "0")]
    pub upstream_timeout_secs: u64,

    // --- General App Args ---
    /// Interface the HTTP server binds to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the HTTP server listens on.
    #[arg(long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

impl Args {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn llm_type(&self) -> Result<LlmType, String> {
        self.chat_llm_type.parse::<LlmType>().map_err(|e| e.to_string())
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        Some(self.chat_api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .or_else(|| non_empty_env("OPENAI_API_KEY"))
            .or_else(|| non_empty_env("GROQ_API_KEY"))
    }

    pub fn resolve_model(&self, llm_type: LlmType) -> Option<String> {
        let explicit = self.chat_model.clone().filter(|m| !m.trim().is_empty());
        match llm_type {
            LlmType::Groq => explicit.or_else(|| non_empty_env("GROQ_MODEL")),
            LlmType::OpenAI => explicit,
        }
    }

    pub fn llm_config(&self) -> Result<LlmConfig, String> {
        let llm_type = self.llm_type()?;
        Ok(LlmConfig {
            llm_type,
            api_key: self.resolve_api_key(),
            completion_model: self.resolve_model(llm_type),
            base_url: self.chat_base_url.clone().filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            system_prompt: self.system_prompt.clone(),
            options: GenerationOptions {
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            },
            history_limit: self.history_limit,
            upstream_timeout: match self.upstream_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
