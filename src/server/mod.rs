pub mod api;

use crate::relay::RelaySession;
use log::{ error, info };
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct Server {
    addr: String,
    relay: Arc<RelaySession>,
}

impl Server {
    pub fn new(addr: String, relay: Arc<RelaySession>) -> Self {
        Self { addr, relay }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.addr).await.map_err(|e| {
            error!("Failed to bind HTTP server to {}: {}. Try a different port.", self.addr, e);
            e
        })?;
        info!("Chat relay listening on: http://{}", listener.local_addr()?);

        let app = api::router(self.relay.clone());
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal()).await?;

        info!("Chat relay stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
