//! Moderator HTTP handlers (`/api/*` and `/mod/*`). Thin wrappers over `logic`.
//! Every handler is authenticated by `Moderator` or `BrowserModerator`.

use std::sync::Arc;
use axum::{
  extract::{Path, Query, State},
  http::{header::HOST, HeaderMap},
  Form, Json,
};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::error::AppError;
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

use super::auth::{BrowserModerator, Moderator};

#[instrument(level = "info", skip(state, mod_user, raw), fields(actor = %mod_user.username))]
pub async fn http_put_questions(
  State(state): State<Arc<AppState>>,
  Moderator(mod_user): Moderator,
  Json(raw): Json<Value>,
) -> Result<Json<StatusOut>, AppError> {
  update_questions(&state, &mod_user.username, &raw).await?;
  Ok(Json(StatusOut::ok()))
}

#[instrument(level = "info", skip_all)]
pub async fn http_get_queue(State(state): State<Arc<AppState>>, _mod: Moderator) -> Json<QueueOut> {
  Json(queue(&state).await)
}

/// Plain-text key, shown once in the settings page.
#[instrument(level = "info", skip_all, fields(actor = %mod_user.username))]
pub async fn http_issue_key(
  State(state): State<Arc<AppState>>,
  BrowserModerator(mod_user): BrowserModerator,
) -> Result<String, AppError> {
  issue_key(&state, &mod_user.username).await
}

#[instrument(level = "info", skip(state, mod_user, body), fields(actor = %mod_user.username, setting = %body.setting))]
pub async fn http_update_setting(
  State(state): State<Arc<AppState>>,
  Moderator(mod_user): Moderator,
  Form(body): Form<SettingIn>,
) -> Result<Json<StatusOut>, AppError> {
  update_setting(&state, &mod_user.username, &body.setting, &body.data).await?;
  Ok(Json(StatusOut::ok()))
}

#[instrument(level = "info", skip_all)]
pub async fn http_get_settings(
  State(state): State<Arc<AppState>>,
  _mod: Moderator,
) -> Result<Json<Map<String, Value>>, AppError> {
  Ok(Json(settings_listing(&state).await?))
}

#[instrument(level = "info", skip(state, mod_user, body), fields(actor = %mod_user.username, username = %body.username))]
pub async fn http_add_exemption(
  State(state): State<Arc<AppState>>,
  Moderator(mod_user): Moderator,
  Form(body): Form<UsernameIn>,
) -> Result<Json<StatusOut>, AppError> {
  add_exemption(&state, &mod_user.username, &body.username).await?;
  Ok(Json(StatusOut::ok()))
}

/// Without a body only processed users are removed.
#[instrument(level = "info", skip(state, mod_user, body), fields(actor = %mod_user.username))]
pub async fn http_clear(
  State(state): State<Arc<AppState>>,
  Moderator(mod_user): Moderator,
  body: Option<Json<ClearIn>>,
) -> Json<StatusOut> {
  let all = body.map(|Json(b)| b.all).unwrap_or(false);
  clear(&state, &mod_user.username, all).await;
  Json(StatusOut::ok())
}

#[instrument(level = "info", skip(state, mod_user, headers, body), fields(actor = %mod_user.username, username = %body.username))]
pub async fn http_add_mod(
  State(state): State<Arc<AppState>>,
  Moderator(mod_user): Moderator,
  headers: HeaderMap,
  Form(body): Form<UsernameIn>,
) -> Result<Json<StatusOut>, AppError> {
  let host = headers.get(HOST).and_then(|h| h.to_str().ok()).unwrap_or("localhost");
  let settings_url = format!("https://{host}/mod/settings");
  add_mod(&state, &mod_user.username, &body.username, &settings_url).await?;
  Ok(Json(StatusOut::ok()))
}

#[instrument(level = "info", skip(state, mod_user, body), fields(actor = %mod_user.username, username = %body.username))]
pub async fn http_remove_mod(
  State(state): State<Arc<AppState>>,
  Moderator(mod_user): Moderator,
  Form(body): Form<UsernameIn>,
) -> Result<Json<StatusOut>, AppError> {
  remove_mod(&state, &mod_user.username, &body.username).await?;
  Ok(Json(StatusOut::ok()))
}

#[instrument(level = "info", skip_all, fields(actor = %mod_user.username))]
pub async fn http_process(
  State(state): State<Arc<AppState>>,
  Moderator(mod_user): Moderator,
) -> Result<Json<TextOut>, AppError> {
  Ok(Json(process_next(&state, &mod_user.username).await?))
}

#[instrument(level = "info", skip_all)]
pub async fn http_list_users(
  State(state): State<Arc<AppState>>,
  _mod: BrowserModerator,
  Query(q): Query<UsersQuery>,
) -> Json<UsersPage> {
  Json(list_users(&state, &q).await)
}

#[instrument(level = "info", skip(state, _mod))]
pub async fn http_user_lookup(
  State(state): State<Arc<AppState>>,
  _mod: BrowserModerator,
  Path(username): Path<String>,
) -> Result<Json<UserDetail>, AppError> {
  Ok(Json(user_lookup(&state, &username).await?))
}
