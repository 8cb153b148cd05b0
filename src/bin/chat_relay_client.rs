use chat_relay::client::RelayClient;
use clap::Parser;
use dotenv::dotenv;
use log::{ error, info };
use std::error::Error;
use std::io::Write;
use tokio::io::{ AsyncBufReadExt, BufReader };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Terminal client for the chat relay", long_about = None)]
struct ClientArgs {
    /// API root of the relay server.
    #[arg(long, env = "CHAT_API_URL", default_value = "http://localhost:5000/api")]
    api_url: String,

    /// Continue an existing conversation instead of starting a new one.
    #[arg(long)]
    conversation_id: Option<String>,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,
}

const HELP: &str = "Commands: /new, /clear, /provider, /quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    let args = ClientArgs::parse();
    let default_level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let client = RelayClient::new(args.api_url.clone());
    let health = client.health().await?;
    info!("Relay at {} is {}", args.api_url, health.status);

    let mut conversation_id = match args.conversation_id {
        Some(id) => id,
        None => client.new_conversation().await?,
    };
    println!("Conversation {}. {}", conversation_id, HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => {
                break;
            }
        };
        let input = line.trim();
        match input {
            "" => {
                continue;
            }
            "/quit" | "/exit" => {
                break;
            }
            "/new" => {
                conversation_id = client.new_conversation().await?;
                println!("Started conversation {}", conversation_id);
                continue;
            }
            "/clear" => {
                let message = client.clear_conversation(&conversation_id).await?;
                println!("{}", message);
                continue;
            }
            "/provider" => {
                let info = client.provider_info().await?;
                println!("provider={} model={} hasApiKey={}", info.provider, info.model, info.has_api_key);
                continue;
            }
            _ => {}
        }

        let reply = client.send_message(input, Some(&conversation_id), |delta| {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }).await;
        match reply {
            Ok(reply) => {
                println!();
                if let Some(id) = reply.conversation_id {
                    conversation_id = id;
                }
            }
            Err(e) => {
                println!();
                error!("Chat request failed: {}", e);
                eprintln!("Error: {}", e);
            }
        }
    }

    Ok(())
}
