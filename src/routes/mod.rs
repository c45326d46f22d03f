//! Router assembly: applicant endpoints, moderator API, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod auth;
pub mod http;
pub mod moderation;

/// Build the application router with:
/// - Login flow at `/auth`, `/callback`, `/logout`
/// - The applicant form at `/form` (GET serves, POST submits) and `/preview`
/// - Moderator API under `/api/...` (session or API key) and `/mod/...` (browser only)
/// - Static frontend from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        // Applicant
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/site", get(http::http_site))
        .route("/auth", get(http::http_auth))
        .route("/callback", get(http::http_callback))
        .route("/logout", get(http::http_logout))
        .route("/form", get(http::http_get_form).post(http::http_post_form))
        .route("/preview", get(http::http_preview))
        .route("/contact", get(http::http_contact))
        .route("/docs/:location", get(http::http_docs))
        // Moderator API
        .route("/api/questions", post(moderation::http_put_questions))
        .route("/api/queue", get(moderation::http_get_queue))
        .route("/api/issue_key", get(moderation::http_issue_key))
        .route("/api/update_setting", post(moderation::http_update_setting))
        .route("/api/settings", get(moderation::http_get_settings))
        .route("/api/add_exemption", post(moderation::http_add_exemption))
        .route("/api/clear", post(moderation::http_clear))
        .route("/api/add_mod", post(moderation::http_add_mod))
        .route("/api/remove_mod", post(moderation::http_remove_mod))
        .route("/api/process", get(moderation::http_process))
        .route("/mod/users", get(moderation::http_list_users))
        .route("/mod/user/:username", get(moderation::http_user_lookup))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}
