pub mod cli;
pub mod client;
pub mod codec;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod relay;
pub mod server;

use cli::Args;
use log::info;
use relay::RelaySession;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let llm_config = args.llm_config()?;
    let relay_config = args.relay_config();

    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr());
    info!("AI Provider: {}", llm_config.llm_type);
    info!("Has API Key: {}", llm_config.api_key.is_some());
    info!(
        "Chat Model: {}",
        llm_config.completion_model.as_deref().unwrap_or(llm_config.llm_type.default_model())
    );
    info!(
        "Chat Base URL: {}",
        llm_config.base_url.as_deref().unwrap_or(llm_config.llm_type.default_base_url())
    );
    info!("History Store Type: {}", args.history_type);
    info!("History Limit: {}", args.history_limit);
    info!(
        "Generation: temperature={} max_tokens={}",
        relay_config.options.temperature,
        relay_config.options.max_tokens
    );
    info!("Upstream Timeout: {:?}", relay_config.upstream_timeout);
    info!("-------------------------");

    let store = history::initialize_history_store(&args)?;
    let chat_client = llm::chat::new_client(&llm_config)?;
    let relay = Arc::new(RelaySession::new(store, chat_client, relay_config));

    let server = Server::new(args.server_addr(), relay);
    server.run().await?;

    Ok(())
}
