//! Gateform · Reddit application form backend
//!
//! - Axum HTTP API for applicants and form moderators
//! - Reddit OAuth login and delivery (via environment variables)
//! - Static frontend fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                          : u16 (default 3000)
//!   SITE_CONFIG_PATH              : path to TOML config (settings overrides + initial questions)
//!   REDDIT_USER_AGENT             : default "gateform-backend/0.1"
//!   REDDIT_FRONTEND_CLIENT_ID     : OAuth app used for applicant login (enables Reddit)
//!   REDDIT_FRONTEND_CLIENT_SECRET
//!   REDDIT_FRONTEND_REDIRECT_URI  : must point at /callback
//!   REDDIT_BACKEND_CLIENT_ID      : script app for the delivery bot (optional)
//!   REDDIT_BACKEND_CLIENT_SECRET
//!   REDDIT_BACKEND_USERNAME
//!   REDDIT_BACKEND_PASSWORD
//!   LOG_LEVEL                     : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT                    : "pretty" (default) or "json"

mod age;
mod config;
mod domain;
mod eligibility;
mod error;
mod format;
mod instance;
mod logic;
mod protocol;
mod reddit;
mod routes;
mod schema;
mod seeds;
mod state;
mod telemetry;
mod util;
mod validate;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared application state (settings, users, sessions, Reddit client).
  let state = Arc::new(AppState::new());

  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "gateform", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "gateform", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "gateform", error = %e, "Failed to listen for shutdown signal");
  }
}
