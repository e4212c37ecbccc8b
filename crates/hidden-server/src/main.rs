//! # hidden-server
//!
//! HTTP front of the HIDDEN messaging core.
//!
//! This binary opens the SQLite document store, builds the chat
//! orchestrator on top of it and serves the REST and server-sent-event API
//! (axum) used by the web client.

mod api;
mod config;
mod error;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use hidden_chat::ChatOrchestrator;
use hidden_store::{DocumentStore, SqliteStore};

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,hidden_server=debug,hidden_chat=debug")
            }),
        )
        .init();

    info!("Starting HIDDEN chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the document store and build the chat core on top of it
    // -----------------------------------------------------------------------
    let sqlite = match &config.database_path {
        Some(path) => SqliteStore::open_at(path)?,
        None => SqliteStore::open_default()?,
    };
    info!(path = %sqlite.path().display(), "Document store ready");
    let store: Arc<dyn DocumentStore> = Arc::new(sqlite);

    let app_state = AppState {
        chat: ChatOrchestrator::new(store, config.chat_settings()),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
