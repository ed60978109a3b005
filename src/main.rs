//! Eisaku · Japanese-to-English Translation Trainer Backend
//!
//! - Axum HTTP + WebSocket API (one session state machine per connection)
//! - Optional OpenAI integration (via environment variables)
//! - Static SPA fallback (STATIC_DIR/index.html)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   STATIC_DIR          : frontend directory (default "./static")
//!   OPENAI_API_KEY      : enables OpenAI integration if present
//!   OPENAI_BASE_URL     : default "https://api.openai.com/v1"
//!   OPENAI_FAST_MODEL   : default "gpt-4o-mini"
//!   OPENAI_STRONG_MODEL : default "gpt-4o"
//!   OPENAI_TIMEOUT_SECS : request timeout, default 60
//!   AGENT_CONFIG_PATH   : path to TOML config (prompts + limits + optional question bank)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod align;
mod compare;
mod config;
mod domain;
mod error;
mod grading;
mod logic;
mod openai;
mod protocol;
mod routes;
mod seeds;
mod session;
mod split;
mod state;
mod telemetry;
mod text;
mod util;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let state = Arc::new(AppState::new());
  let app = build_router(state);

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "eisaku_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!(target: "eisaku_backend", "Shutdown signal received");
      }
    })
    .await?;
  Ok(())
}
