//! Core behaviors shared by the applicant and moderator handlers.
//!
//! This includes:
//!   - Login (OAuth state round trip, identity upsert)
//!   - Serving, submitting and previewing the form
//!   - Replacing the question schema and single settings
//!   - User administration and the delivery queue
//!
//! Handlers stay thin: they authenticate, call one function here and wrap the result.

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::age::age_to_words;
use crate::domain::{FormInstance, Settings, UserRecord};
use crate::eligibility::{self, FORM_CLOSED};
use crate::error::AppError;
use crate::format::{check_template, render_message, ApplicantContext, ResponseTemplates};
use crate::instance::{expand, preview};
use crate::protocol::{
  CallbackQuery, FormView, QueueOut, SiteOut, TextOut, UserDetail, UserSummary, UsersPage, UsersQuery,
};
use crate::schema::sanitize;
use crate::state::AppState;
use crate::util::now_ts;
use crate::validate::{validate, RawAnswers};

pub const DEFAULT_NEXT: &str = "/form";
const DEFAULT_PAGE_SIZE: usize = 25;
const MAX_PAGE_SIZE: usize = 200;

/// Templates a moderator may edit, and whether `{response}` is allowed in them.
const TEMPLATE_SETTINGS: [(&str, bool); 4] = [
  ("response_body", true),
  ("response_title", false),
  ("message_subject", false),
  ("message_body", false),
];

/// Hidden from the settings listing; edited through their own pages.
const UNLISTED_SETTINGS: [&str; 2] = ["response_body", "min_age_word"];

pub async fn site_info(state: &AppState, viewer: Option<&UserRecord>) -> SiteOut {
  let s = state.settings().await;
  SiteOut {
    site_title: s.site_title,
    welcome_body: s.welcome_body,
    accepting: s.accepting,
    preview_allowed: s.preview_allowed,
    google_analytics_id: Some(s.google_analytics_id).filter(|id| s.google_analytics_enabled && !id.is_empty()),
    logged_in_as: viewer.map(|u| u.username.clone()),
    form_mod: viewer.map(|u| u.form_mod).unwrap_or(false),
  }
}

/// Only local absolute paths are accepted as a post-login destination.
pub fn safe_next(next: Option<&str>) -> String {
  match next {
    Some(p) if p.starts_with('/') && !p.starts_with("//") && !p.contains('\\') => p.to_string(),
    _ => DEFAULT_NEXT.to_string(),
  }
}

/// Create a session and the platform URL that starts its OAuth login.
#[instrument(level = "info", skip(state))]
pub async fn begin_login(state: &AppState, next: Option<&str>) -> Result<(String, String), AppError> {
  let (session_id, session) = state.create_session(safe_next(next)).await;
  let url = state.platform.oauth_url(&session.oauth_state)?;
  Ok((session_id, url))
}

/// Finish the OAuth round trip; returns where to send the browser.
///
/// A callback that does not match the browser's session is bounced to the
/// homepage without logging anyone in.
#[instrument(level = "info", skip(state, q), fields(has_code = q.code.is_some()))]
pub async fn complete_login(state: &AppState, session_id: Option<&str>, q: &CallbackQuery) -> Result<String, AppError> {
  let found = match session_id {
    Some(id) => state.session(id).await.map(|s| (id, s)),
    None => None,
  };
  let Some((id, session)) = found else {
    warn!(target: "gateform", "OAuth callback without a session");
    return Ok("/".into());
  };

  if let Some(err) = &q.error {
    warn!(target: "gateform", error = %err, "OAuth login declined");
    return Ok("/".into());
  }
  if q.state.as_deref() != Some(session.oauth_state.as_str()) {
    warn!(target: "gateform", "OAuth state mismatch");
    return Ok("/".into());
  }
  let code = q
    .code
    .as_deref()
    .ok_or_else(|| AppError::BadRequest("missing OAuth code".into()))?;

  let identity = state.platform.verify_identity(code).await?;
  let user = state.upsert_identity(&identity).await;
  state.bind_session(id, &user.username).await;
  info!(target: "gateform", username = %user.username, form_mod = user.form_mod, "User logged in");
  Ok(session.next)
}

/// The user's in-progress instance, if one was stored and still parses.
fn stored_instance(user: &UserRecord) -> Option<FormInstance> {
  if user.response.is_empty() {
    return None;
  }
  match serde_json::from_str(&user.response) {
    Ok(instance) => Some(instance),
    Err(e) => {
      warn!(target: "form", username = %user.username, error = %e, "Stored instance unreadable; issuing a new one");
      None
    }
  }
}

fn not_found(username: &str) -> AppError {
  AppError::NotFound(format!("user {username}"))
}

/// Gate the form: closed site first, then eligibility.
fn gate(settings: &Settings, user: &UserRecord, now: i64, simulate: bool) -> Option<FormView> {
  if !settings.accepting {
    return Some(FormView::Closed { message: FORM_CLOSED.into() });
  }
  let issues = eligibility::check(user, settings, now, simulate);
  if issues.is_empty() {
    return None;
  }
  info!(target: "form", username = %user.username, issues = issues.len(), simulate, "Applicant not eligible");
  Some(FormView::Ineligible { issues })
}

/// Serve the applicant's instance, expanding and storing a new one on first visit.
/// Reloading returns the same tokens.
#[instrument(level = "info", skip(state), fields(%username))]
pub async fn form_view(state: &AppState, username: &str, simulate: bool) -> Result<FormView, AppError> {
  let settings = state.settings().await;
  let mut users = state.users.write().await;
  let user = users.get_mut(username).ok_or_else(|| not_found(username))?;
  if let Some(view) = gate(&settings, user, now_ts(), simulate) {
    return Ok(view);
  }

  let instance = match stored_instance(user) {
    Some(instance) => instance,
    None => {
      let instance = expand(&settings.schema);
      user.response = serde_json::to_string(&instance)?;
      debug!(target: "form", %username, tokens = instance.tokens().count(), "New form instance issued");
      instance
    }
  };
  Ok(FormView::Open { instructions: settings.instructions, questions: instance })
}

/// Validate, then either echo the annotated instance or record the submission.
///
/// The record is only changed in place while the user store is locked, and
/// everything the submission needs is rendered first, so a template failure
/// leaves the applicant able to submit again.
#[instrument(level = "info", skip(state, answers), fields(%username))]
pub async fn submit_form(state: &AppState, username: &str, answers: &RawAnswers) -> Result<FormView, AppError> {
  let settings = state.settings().await;
  let now = now_ts();
  let context = {
    let mut users = state.users.write().await;
    let user = users.get_mut(username).ok_or_else(|| not_found(username))?;
    if let Some(view) = gate(&settings, user, now, false) {
      return Ok(view);
    }

    let mut instance = stored_instance(user)
      .ok_or_else(|| AppError::BadRequest("No form is in progress. Reload the form and try again.".into()))?;

    if validate(&mut instance, answers) {
      user.response = serde_json::to_string(&instance)?;
      info!(target: "form", %username, "Submission rejected by validators");
      return Ok(FormView::Open { instructions: settings.instructions, questions: instance });
    }

    let context = ApplicantContext::from_user(user, now);
    let templates = ResponseTemplates { body: &settings.response_body, title: &settings.response_title };
    let rendered = crate::format::format(&instance, templates, &context)?;
    let response = serde_json::to_string(&instance)?;

    user.response = response;
    user.full_body_md = rendered.body_markdown;
    user.full_body_html = rendered.body_html;
    user.response_title = rendered.title;
    user.submitted = true;
    user.is_exempt = false;
    context
  };
  info!(target: "form", %username, "Submission recorded");

  if settings.message_user {
    send_confirmation(state, &settings, &context).await;
  }
  Ok(FormView::Submitted { success_url: settings.success_url })
}

/// Best effort: a failed confirmation never undoes a recorded submission.
async fn send_confirmation(state: &AppState, settings: &Settings, context: &ApplicantContext) {
  let rendered = render_message(&settings.message_subject, context)
    .and_then(|subject| Ok((subject, render_message(&settings.message_body, context)?)));
  match rendered {
    Ok((subject, body)) => {
      if let Err(e) = state.platform.send_message(&context.username, &subject, &body).await {
        warn!(target: "platform", username = %context.username, error = %e, "Confirmation message failed");
      }
    }
    Err(e) => error!(target: "form", error = %e, "Confirmation template failed to render"),
  }
}

/// Read-only view of the schema. Moderators may preview even when previews are off.
pub async fn preview_form(state: &AppState, viewer: Option<&UserRecord>) -> Result<FormInstance, AppError> {
  let settings = state.settings.read().await;
  if !settings.preview_allowed && !viewer.map(|u| u.form_mod).unwrap_or(false) {
    return Err(AppError::Forbidden);
  }
  Ok(preview(&settings.schema))
}

//
// Moderator operations
//

/// Replace the active schema. Existing instances keep the schema they were built from.
#[instrument(level = "info", skip(state, raw), fields(%actor))]
pub async fn update_questions(state: &AppState, actor: &str, raw: &Value) -> Result<usize, AppError> {
  let schema = sanitize(raw)?;
  let count = schema.questions.len();
  info!(target: "moderation", %actor, questions = count, required_tokens = schema.required_tokens, "Question schema replaced");
  state.settings.write().await.schema = schema;
  Ok(count)
}

fn type_name(v: &Value) -> &'static str {
  match v {
    Value::Bool(_) => "bool",
    Value::Number(_) => "int",
    Value::String(_) => "str",
    _ => "NoneType",
  }
}

/// Parse form text into the JSON type the setting already has.
fn coerce(current: &Value, data: &str) -> Option<Value> {
  match current {
    Value::Bool(_) => match data {
      "true" => Some(Value::Bool(true)),
      "false" => Some(Value::Bool(false)),
      _ => None,
    },
    Value::Number(_) => data.trim().parse::<i64>().ok().map(Value::from),
    Value::String(_) => Some(Value::String(data.to_string())),
    _ => None,
  }
}

fn min_age_word(min_age: i64) -> String {
  age_to_words(min_age as f64).unwrap_or_default()
}

/// Set one setting from its text form. Templates are dry-run before saving,
/// and changing `min_age` refreshes its wording.
#[instrument(level = "info", skip(state, data), fields(%actor, data_len = data.len()))]
pub async fn update_setting(state: &AppState, actor: &str, name: &str, data: &str) -> Result<(), AppError> {
  let key = name.to_lowercase();
  let mut settings = state.settings.write().await;

  let mut fields = match serde_json::to_value(&*settings)? {
    Value::Object(map) => map,
    _ => Map::new(),
  };
  let current = fields
    .get(&key)
    .ok_or_else(|| AppError::BadRequest(format!("setting field {name} does not exist")))?;
  let value = coerce(current, data)
    .ok_or_else(|| AppError::BadRequest(format!("setting field {name} expects a value of type {}", type_name(current))))?;

  if let Some((_, allow_response)) = TEMPLATE_SETTINGS.iter().find(|(n, _)| *n == key) {
    check_template(data, *allow_response).map_err(|source| AppError::Template { setting: key.clone(), source })?;
  }

  fields.insert(key.clone(), value);
  let mut updated: Settings = serde_json::from_value(Value::Object(fields))?;
  updated.schema = std::mem::take(&mut settings.schema);
  if key == "min_age" {
    updated.min_age_word = min_age_word(updated.min_age);
  }
  *settings = updated;
  info!(target: "moderation", %actor, setting = %key, "Setting updated");
  Ok(())
}

/// Editable settings as `{name: {value, type}}`.
pub async fn settings_listing(state: &AppState) -> Result<Map<String, Value>, AppError> {
  let settings = state.settings().await;
  let fields = match serde_json::to_value(&settings)? {
    Value::Object(map) => map,
    _ => Map::new(),
  };
  Ok(
    fields
      .into_iter()
      .filter(|(k, _)| !UNLISTED_SETTINGS.contains(&k.as_str()))
      .map(|(k, v)| {
        let entry = json!({ "type": type_name(&v), "value": v });
        (k, entry)
      })
      .collect(),
  )
}

fn pending(u: &UserRecord) -> bool {
  u.submitted && !u.processed
}

pub async fn queue(state: &AppState) -> QueueOut {
  let number = state.users.read().await.values().filter(|u| pending(u)).count();
  QueueOut { text: format!("There are currently {number} item(s) in the queue."), number }
}

/// Deliver the oldest pending submission. The record is claimed before the
/// platform call so concurrent callers never deliver it twice, and it is only
/// marked processed once the platform accepted it.
#[instrument(level = "info", skip(state), fields(%actor))]
pub async fn process_next(state: &AppState, actor: &str) -> Result<TextOut, AppError> {
  let destination = state.settings.read().await.destination_id.clone();
  let (claimed, count) = {
    let mut users = state.users.write().await;
    let count = users.values().filter(|u| pending(u)).count();
    let oldest = users
      .values()
      .filter(|u| pending(u) && !u.delivering)
      .min_by_key(|u| u.id)
      .map(|u| u.username.clone());
    let Some(name) = oldest else {
      return Ok(TextOut { text: format!("{count} unprocessed form submissions remaining") });
    };
    if destination.trim().is_empty() {
      return Err(AppError::BadRequest("no destination is configured (setting destination_id)".into()));
    }
    let user = users.get_mut(&name).ok_or_else(|| not_found(&name))?;
    user.delivering = true;
    (user.clone(), count)
  };

  let delivered = state
    .platform
    .deliver(&claimed.response_title, &claimed.full_body_md, &destination)
    .await;
  if let Some(u) = state.users.write().await.get_mut(&claimed.username) {
    u.delivering = false;
    u.processed = delivered.is_ok();
  }
  delivered?;
  info!(target: "moderation", %actor, username = %claimed.username, %destination, "Submission delivered");
  Ok(TextOut { text: format!("{} unprocessed form submissions remaining", count - 1) })
}

pub async fn issue_key(state: &AppState, username: &str) -> Result<String, AppError> {
  let key = state
    .users
    .write()
    .await
    .issue_api_key(username)
    .ok_or_else(|| AppError::NotFound(format!("user {username}")))?;
  info!(target: "moderation", %username, "API key issued");
  Ok(key)
}

/// Let a user skip the eligibility checks once; their old instance is discarded.
#[instrument(level = "info", skip(state), fields(%actor))]
pub async fn add_exemption(state: &AppState, actor: &str, username: &str) -> Result<(), AppError> {
  let username = username.trim();
  if username.is_empty() {
    return Err(AppError::BadRequest("username not provided".into()));
  }
  let mut users = state.users.write().await;
  let user = users
    .get_mut(username)
    .ok_or_else(|| AppError::BadRequest("User does not exist yet".into()))?;
  user.is_exempt = true;
  user.response.clear();
  info!(target: "moderation", %actor, username = %user.username, "Exemption granted");
  Ok(())
}

/// Delete processed users, or every user with `all`. Form moderators are kept.
#[instrument(level = "info", skip(state), fields(%actor))]
pub async fn clear(state: &AppState, actor: &str, all: bool) -> usize {
  let mut users = state.users.write().await;
  let before = users.len();
  users.retain(|_, u| u.form_mod || !(all || u.processed));
  let removed = before - users.len();
  info!(target: "moderation", %actor, all, removed, "Users cleared");
  removed
}

/// Promote `username`, give them an API key and invite them by message.
#[instrument(level = "info", skip(state, settings_url), fields(%actor))]
pub async fn add_mod(state: &AppState, actor: &str, username: &str, settings_url: &str) -> Result<(), AppError> {
  let name = {
    let mut users = state.users.write().await;
    let user = users
      .get_mut(username)
      .ok_or_else(|| AppError::BadRequest("user not found".into()))?;
    user.form_mod = true;
    let name = user.username.clone();
    users.issue_api_key(&name);
    name
  };
  info!(target: "moderation", %actor, username = %name, "Moderator added");

  let site_title = state.settings.read().await.site_title.clone();
  let subject = format!("invitation to moderate {site_title}");
  let body = format!(
    "**gadzooks!** u/{actor} has added you as a moderator of {site_title}\n\n\
     click [here]({settings_url}) to view the site. mod tools will be visible at the top of the page."
  );
  if let Err(e) = state.platform.send_message(&name, &subject, &body).await {
    warn!(target: "platform", username = %name, error = %e, "Moderator invitation failed");
  }
  Ok(())
}

#[instrument(level = "info", skip(state), fields(%actor))]
pub async fn remove_mod(state: &AppState, actor: &str, username: &str) -> Result<(), AppError> {
  let mut users = state.users.write().await;
  let user = users
    .get_mut(username)
    .ok_or_else(|| AppError::BadRequest("user not found".into()))?;
  user.form_mod = false;
  info!(target: "moderation", %actor, username = %user.username, "Moderator removed");
  Ok(())
}

/// `"false"` (any case) is false; any other value is true.
fn flag(raw: &str) -> bool {
  !raw.eq_ignore_ascii_case("false")
}

enum UserFilter {
  All,
  FormMod(bool),
  Exempt(bool),
}

impl UserFilter {
  fn keeps(&self, u: &UserRecord) -> bool {
    match self {
      UserFilter::All => true,
      UserFilter::FormMod(want) => u.form_mod == *want,
      UserFilter::Exempt(want) => u.is_exempt == *want,
    }
  }
}

/// One page of users ordered by creation, optionally filtered.
pub async fn list_users(state: &AppState, q: &UsersQuery) -> UsersPage {
  let users = state.users.read().await;

  if let Some(name) = &q.user {
    return UsersPage {
      users: users.get(name).map(UserSummary::from).into_iter().collect(),
      prev: None,
      next: None,
    };
  }

  let page = q.page.unwrap_or(1).max(1);
  let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
  let (filter, suffix) = match (&q.is_mod, &q.exempt) {
    (Some(raw), _) => (UserFilter::FormMod(flag(raw)), format!("&mod={}", raw.to_lowercase())),
    (None, Some(raw)) => (UserFilter::Exempt(flag(raw)), format!("&exempt={}", raw.to_lowercase())),
    (None, None) => (UserFilter::All, String::new()),
  };

  let mut matching: Vec<&UserRecord> = users.values().filter(|u| filter.keeps(u)).collect();
  matching.sort_by_key(|u| u.id);
  let start = (page - 1).saturating_mul(limit);
  let rows: Vec<UserSummary> = matching.iter().skip(start).take(limit).map(|u| UserSummary::from(*u)).collect();
  let has_more = matching.len() > start.saturating_add(limit);

  UsersPage {
    users: rows,
    prev: (page > 1).then(|| format!("/mod/users?page={}&limit={limit}{suffix}", page - 1)),
    next: has_more.then(|| format!("/mod/users?page={}&limit={limit}{suffix}", page + 1)),
  }
}

/// A user's rendered submission. A trailing `.json` is accepted and ignored.
pub async fn user_lookup(state: &AppState, raw_name: &str) -> Result<UserDetail, AppError> {
  let name = raw_name.strip_suffix(".json").unwrap_or(raw_name);
  let user = state.user(name).await.ok_or_else(|| not_found(name))?;
  Ok(UserDetail {
    show_warning: user.username != name,
    username: user.username,
    response_md: user.full_body_md,
    response_html: user.full_body_html,
    submitted: user.submitted,
    processed: user.processed,
    last_login: user.last_login,
  })
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::domain::{Identity, Response};
  use crate::error::TemplateError;
  use crate::reddit::testing::{RecordingPlatform, Sent};

  fn identity(name: &str) -> Identity {
    Identity {
      name: name.into(),
      created: 1_500_000_000,
      link_karma: 10,
      comment_karma: 10,
      is_mod: false,
      has_verified_email: true,
    }
  }

  async fn site(questions: Value) -> (AppState, Arc<RecordingPlatform>) {
    let settings = Settings {
      accepting: true,
      min_karma: 0,
      min_age: 0,
      destination_id: "r/mods".into(),
      schema: sanitize(&questions).unwrap(),
      ..Settings::default()
    };
    let platform = Arc::new(RecordingPlatform::default());
    let state = AppState::with_platform(settings, platform.clone());
    state.upsert_identity(&identity("alice")).await;
    state.upsert_identity(&identity("bob")).await;
    (state, platform)
  }

  fn age_question() -> Value {
    json!([{ "text": "Age", "type": "number", "validators": { "min": 18 } }])
  }

  fn open(view: FormView) -> FormInstance {
    match view {
      FormView::Open { questions, .. } => questions,
      other => panic!("expected an open form, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn reload_serves_the_same_instance() {
    let (state, _) = site(age_question()).await;
    let first = open(form_view(&state, "bob", false).await.unwrap());
    let again = open(form_view(&state, "bob", false).await.unwrap());
    assert_eq!(first, again);
    assert_eq!(first.questions.len(), 1);
  }

  #[tokio::test]
  async fn submission_round_trip() {
    let (state, platform) = site(age_question()).await;
    let token = open(form_view(&state, "bob", false).await.unwrap()).questions[0].token.clone();

    let view = submit_form(&state, "bob", &RawAnswers::from_pairs([(token.as_str(), "15")])).await.unwrap();
    let echoed = open(view);
    assert_eq!(echoed.questions[0].response, Response::Number(15));
    assert!(echoed.questions[0].errors[0].contains("too small"));
    assert!(!state.user("bob").await.unwrap().submitted);

    let view = submit_form(&state, "bob", &RawAnswers::from_pairs([(token.as_str(), "25")])).await.unwrap();
    assert_eq!(view, FormView::Submitted { success_url: "https://www.reddit.com/".into() });

    let bob = state.user("bob").await.unwrap();
    assert!(bob.submitted);
    assert!(bob.full_body_md.contains("**1. Age**\n\n> 25"));
    assert!(bob.full_body_html.contains("<blockquote>"));
    assert_eq!(bob.response_title, "u/bob");
    assert_eq!(
      platform.sent(),
      vec![Sent::Message {
        to: "bob".into(),
        subject: "Form submission received".into(),
        body: "Hi bob, we have received your submission.".into(),
      }]
    );

    match form_view(&state, "bob", false).await.unwrap() {
      FormView::Ineligible { issues } => assert_eq!(issues, vec![eligibility::ALREADY_SUBMITTED.to_string()]),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[tokio::test]
  async fn closed_form_short_circuits() {
    let (state, _) = site(age_question()).await;
    update_setting(&state, "alice", "accepting", "false").await.unwrap();
    assert_eq!(
      form_view(&state, "bob", false).await.unwrap(),
      FormView::Closed { message: FORM_CLOSED.into() }
    );
  }

  #[tokio::test]
  async fn submit_without_instance_is_rejected() {
    let (state, _) = site(age_question()).await;
    let err = submit_form(&state, "bob", &RawAnswers::default()).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
  }

  #[tokio::test]
  async fn queue_and_process() {
    let (state, platform) = site(age_question()).await;
    update_setting(&state, "alice", "message_user", "false").await.unwrap();
    let token = open(form_view(&state, "bob", false).await.unwrap()).questions[0].token.clone();
    submit_form(&state, "bob", &RawAnswers::from_pairs([(token.as_str(), "30")])).await.unwrap();

    assert_eq!(queue(&state).await.number, 1);
    let out = process_next(&state, "alice").await.unwrap();
    assert_eq!(out.text, "0 unprocessed form submissions remaining");
    assert!(matches!(&platform.sent()[..], [Sent::Post { subreddit, title, .. }] if subreddit == "mods" && title == "u/bob"));
    assert!(state.user("bob").await.unwrap().processed);
    assert_eq!(queue(&state).await.number, 0);

    let out = process_next(&state, "alice").await.unwrap();
    assert_eq!(out.text, "0 unprocessed form submissions remaining");
    assert_eq!(platform.sent().len(), 1);
  }

  #[tokio::test]
  async fn concurrent_process_calls_deliver_once() {
    let (state, platform) = site(age_question()).await;
    update_setting(&state, "alice", "message_user", "false").await.unwrap();
    let token = open(form_view(&state, "bob", false).await.unwrap()).questions[0].token.clone();
    submit_form(&state, "bob", &RawAnswers::from_pairs([(token.as_str(), "30")])).await.unwrap();

    let (a, b) = tokio::join!(process_next(&state, "alice"), process_next(&state, "alice"));
    let mut texts = vec![a.unwrap().text, b.unwrap().text];
    texts.sort();
    assert_eq!(texts, vec!["0 unprocessed form submissions remaining", "1 unprocessed form submissions remaining"]);
    assert_eq!(platform.sent().len(), 1);

    let bob = state.user("bob").await.unwrap();
    assert!(bob.processed);
    assert!(!bob.delivering);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn submission_keeps_concurrent_promotion() {
    for _ in 0..50 {
      let (state, _) = site(age_question()).await;
      update_setting(&state, "alice", "message_user", "false").await.unwrap();
      let token = open(form_view(&state, "bob", false).await.unwrap()).questions[0].token.clone();

      let submitting = {
        let state = state.clone();
        tokio::spawn(async move {
          submit_form(&state, "bob", &RawAnswers::from_pairs([(token.as_str(), "30")])).await
        })
      };
      let promoting = {
        let state = state.clone();
        tokio::spawn(async move { add_mod(&state, "alice", "bob", "https://site.test/mod/settings").await })
      };
      submitting.await.unwrap().unwrap();
      promoting.await.unwrap().unwrap();

      let bob = state.user("bob").await.unwrap();
      assert!(bob.submitted);
      assert!(bob.form_mod);
      assert!(bob.api_key.is_some());
    }
  }

  #[tokio::test]
  async fn settings_are_typed() {
    let (state, _) = site(age_question()).await;
    update_setting(&state, "alice", "min_karma", "250").await.unwrap();
    update_setting(&state, "alice", "MIN_AGE", "86400").await.unwrap();
    let s = state.settings().await;
    assert_eq!(s.min_karma, 250);
    assert_eq!(s.min_age_word, "1 day");
    assert_eq!(s.schema.questions.len(), 1, "schema survives a setting update");

    assert!(matches!(
      update_setting(&state, "alice", "min_karma", "lots").await,
      Err(AppError::BadRequest(_))
    ));
    let err = update_setting(&state, "alice", "colour", "red").await.unwrap_err();
    assert_eq!(err.to_string(), "setting field colour does not exist");
    let err = update_setting(&state, "alice", "response_title", "{response}").await.unwrap_err();
    assert!(matches!(
      err,
      AppError::Template { source: TemplateError::UnknownPlaceholder(ref f), .. } if f == "response"
    ));
  }

  #[tokio::test]
  async fn listing_hides_unlisted_settings() {
    let (state, _) = site(age_question()).await;
    let listing = settings_listing(&state).await.unwrap();
    assert_eq!(listing["accepting"], json!({ "type": "bool", "value": true }));
    assert_eq!(listing["min_karma"]["type"], "int");
    assert_eq!(listing["site_title"]["type"], "str");
    assert!(!listing.contains_key("response_body"));
    assert!(!listing.contains_key("min_age_word"));
  }

  #[tokio::test]
  async fn questions_update_replaces_schema() {
    let (state, _) = site(age_question()).await;
    let n = update_questions(&state, "alice", &json!([{ "text": "Why?", "type": "TEXT" }, { "text": "x", "type": "slider" }]))
      .await
      .unwrap();
    assert_eq!(n, 1);
    assert!(update_questions(&state, "alice", &json!({ "text": "not a list" })).await.is_err());
    assert_eq!(state.settings().await.schema.questions[0].text, "Why?");
  }

  #[tokio::test]
  async fn exemption_clears_progress() {
    let (state, _) = site(age_question()).await;
    form_view(&state, "bob", false).await.unwrap();
    add_exemption(&state, "alice", "BOB").await.unwrap();
    let bob = state.user("bob").await.unwrap();
    assert!(bob.is_exempt);
    assert!(bob.response.is_empty());

    assert_eq!(
      add_exemption(&state, "alice", "carol").await.unwrap_err().to_string(),
      "User does not exist yet"
    );
    assert_eq!(add_exemption(&state, "alice", " ").await.unwrap_err().to_string(), "username not provided");
  }

  #[tokio::test]
  async fn moderators_come_and_go() {
    let (state, platform) = site(age_question()).await;
    add_mod(&state, "alice", "Bob", "https://forms.test/mod/settings").await.unwrap();
    let bob = state.user("bob").await.unwrap();
    assert!(bob.form_mod);
    assert!(bob.api_key.is_some());
    match &platform.sent()[..] {
      [Sent::Message { to, subject, body }] => {
        assert_eq!(to, "bob");
        assert_eq!(subject, "invitation to moderate subreddit form site");
        assert!(body.contains("u/alice has added you"));
        assert!(body.contains("(https://forms.test/mod/settings)"));
      }
      other => panic!("unexpected {other:?}"),
    }

    remove_mod(&state, "alice", "bob").await.unwrap();
    assert!(!state.user("bob").await.unwrap().form_mod);
    assert!(remove_mod(&state, "alice", "nobody").await.is_err());
  }

  #[tokio::test]
  async fn clear_keeps_moderators() {
    let (state, _) = site(age_question()).await;
    state.upsert_identity(&identity("carol")).await;
    state.users.write().await.get_mut("carol").unwrap().processed = true;

    assert_eq!(clear(&state, "alice", false).await, 1);
    assert!(state.user("bob").await.is_some());
    assert_eq!(clear(&state, "alice", true).await, 1);
    assert!(state.user("bob").await.is_none());
    assert!(state.user("alice").await.is_some());
  }

  #[tokio::test]
  async fn users_are_paged_and_filtered() {
    let (state, _) = site(age_question()).await;
    for name in ["c", "d", "e"] {
      state.upsert_identity(&identity(name)).await;
    }

    let page = list_users(&state, &UsersQuery { page: Some(1), limit: Some(2), ..Default::default() }).await;
    let names: Vec<_> = page.users.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, ["alice", "bob"]);
    assert_eq!(page.prev, None);
    assert_eq!(page.next.as_deref(), Some("/mod/users?page=2&limit=2"));

    let last = list_users(&state, &UsersQuery { page: Some(3), limit: Some(2), ..Default::default() }).await;
    assert_eq!(last.users.len(), 1);
    assert_eq!(last.next, None);

    let mods = list_users(&state, &UsersQuery { is_mod: Some("TRUE".into()), ..Default::default() }).await;
    assert_eq!(mods.users.len(), 1);
    assert_eq!(mods.users[0].username, "alice");

    let one = list_users(&state, &UsersQuery { user: Some("BOB".into()), ..Default::default() }).await;
    assert_eq!(one.users.len(), 1);
  }

  #[tokio::test]
  async fn lookup_warns_on_case_mismatch() {
    let (state, _) = site(age_question()).await;
    let detail = user_lookup(&state, "Bob.json").await.unwrap();
    assert_eq!(detail.username, "bob");
    assert!(detail.show_warning);
    assert!(!user_lookup(&state, "bob").await.unwrap().show_warning);
    assert!(matches!(user_lookup(&state, "zed").await, Err(AppError::NotFound(_))));
  }

  #[tokio::test]
  async fn preview_respects_setting() {
    let (state, _) = site(age_question()).await;
    let instance = preview_form(&state, None).await.unwrap();
    assert_eq!(instance.questions[0].token, "");

    update_setting(&state, "alice", "preview_allowed", "false").await.unwrap();
    assert!(matches!(preview_form(&state, None).await, Err(AppError::Forbidden)));
    let alice = state.user("alice").await.unwrap();
    assert!(preview_form(&state, Some(&alice)).await.is_ok());
  }

  #[tokio::test]
  async fn login_round_trip() {
    let (state, _) = site(age_question()).await;
    let (sid, url) = begin_login(&state, Some("/mod/settings")).await.unwrap();
    let oauth_state = state.session(&sid).await.unwrap().oauth_state;
    assert!(url.ends_with(&oauth_state));

    let forged = CallbackQuery { code: Some("dave".into()), state: Some("forged".into()), error: None };
    assert_eq!(complete_login(&state, Some(&sid), &forged).await.unwrap(), "/");
    assert!(state.user("dave").await.is_none());

    let good = CallbackQuery { code: Some("dave".into()), state: Some(oauth_state), error: None };
    assert_eq!(complete_login(&state, Some(&sid), &good).await.unwrap(), "/mod/settings");
    assert_eq!(state.session(&sid).await.unwrap().username.as_deref(), Some("dave"));
  }

  #[test]
  fn next_must_be_local() {
    assert_eq!(safe_next(Some("/mod/users")), "/mod/users");
    assert_eq!(safe_next(Some("//evil.test")), DEFAULT_NEXT);
    assert_eq!(safe_next(Some("https://evil.test")), DEFAULT_NEXT);
    assert_eq!(safe_next(None), DEFAULT_NEXT);
  }
}
