//! Applicant-facing HTTP handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented; logs carry the username, never answers.

use std::sync::Arc;
use axum::{
  extract::{FromRequest, Path, Query, Request, State},
  http::{header::{CONTENT_TYPE, SET_COOKIE}, HeaderMap},
  response::{IntoResponse, Redirect, Response},
  Form, Json,
};
use tracing::{info, instrument};

use crate::domain::FormInstance;
use crate::error::AppError;
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;
use crate::validate::RawAnswers;

use super::auth::{expired_session_cookie, session_cookie, session_id, Applicant, Viewer};

const DOCS_BASE: &str = "https://github.com/Jakeable/rforms/wiki";

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip_all)]
pub async fn http_site(State(state): State<Arc<AppState>>, Viewer(viewer): Viewer) -> Json<SiteOut> {
  Json(site_info(&state, viewer.as_ref()).await)
}

/// Start OAuth: set the session cookie and bounce to the platform.
#[instrument(level = "info", skip(state))]
pub async fn http_auth(
  State(state): State<Arc<AppState>>,
  Query(q): Query<AuthQuery>,
) -> Result<Response, AppError> {
  let (sid, url) = begin_login(&state, q.next.as_deref()).await?;
  Ok(([(SET_COOKIE, session_cookie(&sid))], Redirect::to(&url)).into_response())
}

#[instrument(level = "info", skip_all)]
pub async fn http_callback(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Query(q): Query<CallbackQuery>,
) -> Result<Redirect, AppError> {
  let sid = session_id(&headers);
  let next = complete_login(&state, sid.as_deref(), &q).await?;
  Ok(Redirect::to(&next))
}

#[instrument(level = "info", skip_all)]
pub async fn http_logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
  if let Some(sid) = session_id(&headers) {
    state.drop_session(&sid).await;
  }
  ([(SET_COOKIE, expired_session_cookie())], Redirect::to("/")).into_response()
}

#[instrument(level = "info", skip(state, user), fields(username = %user.username))]
pub async fn http_get_form(
  State(state): State<Arc<AppState>>,
  Applicant(user): Applicant,
  Query(q): Query<FormQuery>,
) -> Result<Json<FormView>, AppError> {
  Ok(Json(form_view(&state, &user.username, q.simulate_failure).await?))
}

/// Answers arrive either as an HTML form post (repeated names for checkboxes)
/// or as JSON `{"answers": {...}}`.
async fn read_answers(state: &Arc<AppState>, req: Request) -> Result<RawAnswers, AppError> {
  let is_form = req
    .headers()
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .map(|v| v.starts_with("application/x-www-form-urlencoded"))
    .unwrap_or(false);

  if is_form {
    let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
      .await
      .map_err(|e| AppError::BadRequest(e.body_text()))?;
    Ok(RawAnswers::from_pairs(pairs))
  } else {
    let Json(body) = Json::<SubmitIn>::from_request(req, state)
      .await
      .map_err(|e| AppError::BadRequest(e.body_text()))?;
    Ok(body.answers)
  }
}

#[instrument(level = "info", skip(state, user, req), fields(username = %user.username))]
pub async fn http_post_form(
  State(state): State<Arc<AppState>>,
  Applicant(user): Applicant,
  req: Request,
) -> Result<Json<FormView>, AppError> {
  let answers = read_answers(&state, req).await?;
  let view = submit_form(&state, &user.username, &answers).await?;
  if matches!(view, FormView::Submitted { .. }) {
    info!(target: "form", username = %user.username, "HTTP submission accepted");
  }
  Ok(Json(view))
}

#[instrument(level = "info", skip_all)]
pub async fn http_preview(
  State(state): State<Arc<AppState>>,
  Viewer(viewer): Viewer,
) -> Result<Json<FormInstance>, AppError> {
  Ok(Json(preview_form(&state, viewer.as_ref()).await?))
}

/// Compose a message to whoever the moderators named as contact.
#[instrument(level = "info", skip_all)]
pub async fn http_contact(State(state): State<Arc<AppState>>) -> Redirect {
  let to: String = state
    .settings
    .read()
    .await
    .contact_destination
    .chars()
    .filter(|c| !c.is_control())
    .collect();
  Redirect::to(&format!("https://www.reddit.com/message/compose?to={to}"))
}

/// Documentation lives on the project wiki. Page names are plain wiki slugs.
pub async fn http_docs(Path(location): Path<String>) -> Result<Redirect, AppError> {
  if location.is_empty() || !location.chars().all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c)) {
    return Err(AppError::NotFound(format!("docs page {location}")));
  }
  Ok(Redirect::to(&format!("{DOCS_BASE}/{location}")))
}
