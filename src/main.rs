//! HurdleReader · learning-game backend
//!
//! - Axum HTTP API: upload a PDF, then clear it hurdle by hurdle
//! - Optional OpenAI integration for task generation and open-answer grading
//! - SQLite (sqlx) or in-memory storage
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT               : u16 (default 3000)
//!   UPLOAD_DIR         : where uploaded PDFs are kept (default ./uploads)
//!   DATABASE_URL       : sqlx SQLite URL, or "memory" (default sqlite:./instance/hurdle.db?mode=rwc)
//!   MAX_UPLOAD_MB      : request body limit (default 25)
//!   OPENAI_API_KEY     : enables OpenAI integration if present
//!   OPENAI_BASE_URL    : default "https://api.openai.com/v1"
//!   OPENAI_MODEL       : default "gpt-4o-mini"
//!   LLM_ENABLED        : "false" forces template-only mode
//!   HURDLE_CONFIG_PATH : path to TOML config (prompts, chunking, game rules, llm)
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

mod boss;
mod config;
mod difficulty;
mod domain;
mod error;
mod extract;
mod ingest;
mod logic;
mod openai;
mod progress;
mod protocol;
mod roadmap;
mod routes;
mod segment;
mod state;
mod store;
mod tasks;
mod telemetry;
#[cfg(test)]
mod testing;
mod util;
mod validate;

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::extract::PdfExtractor;
use crate::openai::{LlmClient, OpenAI};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  dotenv::dotenv().ok();
  telemetry::init_tracing();

  let config = AppConfig::from_env();
  let store = store::open_store(&config.database_url).await?;
  tokio::fs::create_dir_all(&config.upload_dir).await?;

  let llm: Option<Arc<dyn LlmClient>> = match OpenAI::from_settings(&config.llm) {
    Some(client) => {
      info!(target: "hurdle_reader", model = %client.model(), "OpenAI integration enabled");
      Some(Arc::new(client))
    }
    None => {
      warn!(target: "hurdle_reader", "OpenAI disabled; tasks come from templates");
      None
    }
  };

  let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
  let state = Arc::new(AppState::new(config, store, llm, Arc::new(PdfExtractor)));
  let app = build_router(state);

  let listener = TcpListener::bind(addr).await?;
  info!(target: "hurdle_reader", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  info!(target: "hurdle_reader", "Server stopped");
  Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      warn!(target: "hurdle_reader", error = %e, "Ctrl-C handler failed");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        warn!(target: "hurdle_reader", error = %e, "SIGTERM handler failed");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
  info!(target: "hurdle_reader", "Shutdown signal received");
}
