//! Reddit integration: OAuth login for applicants and a bot account for delivery.
//!
//! Applicants sign in through the "frontend" OAuth app (identity scope only).
//! Submissions and confirmations go out through a "backend" script app that
//! logs in with a bot account's password.
//!
//! NOTE: We never log secrets or tokens; message bodies are truncated in logs.

use std::time::Duration;

use axum::async_trait;
use reqwest::{header::USER_AGENT, Url};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::domain::Identity;
use crate::error::PlatformError;
use crate::util::trunc_for_log;

const AUTHORIZE_URL: &str = "https://www.reddit.com/api/v1/authorize";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const OAUTH_BASE: &str = "https://oauth.reddit.com";

/// Where a finished submission is sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
  /// Reply to a comment, link or message (`t1_`, `t3_`, `t4_` fullnames).
  Comment { thing_id: String },
  /// New self post in a subreddit.
  Post { subreddit: String },
  /// Private message to a user.
  Message { to: String },
}

impl Destination {
  pub fn parse(raw: &str) -> Self {
    let raw = raw.trim();
    if ["t1_", "t3_", "t4_"].iter().any(|p| raw.starts_with(p)) {
      return Destination::Comment { thing_id: raw.to_string() };
    }
    if let Some((_, name)) = raw.split_once("r/") {
      return Destination::Post { subreddit: name.trim_end_matches('/').to_string() };
    }
    Destination::Message { to: raw.to_string() }
  }
}

/// The external platform as seen by the form site.
#[async_trait]
pub trait Platform: Send + Sync {
  /// URL that starts the OAuth login; `state` comes back on the callback.
  fn oauth_url(&self, state: &str) -> Result<String, PlatformError>;

  /// Exchange an OAuth code for the account behind it.
  async fn verify_identity(&self, code: &str) -> Result<Identity, PlatformError>;

  async fn send_message(&self, to: &str, subject: &str, body: &str) -> Result<(), PlatformError>;

  async fn submit_post(&self, subreddit: &str, title: &str, body: &str) -> Result<(), PlatformError>;

  async fn post_comment(&self, thing_id: &str, body: &str) -> Result<(), PlatformError>;

  /// Route a submission by the shape of `destination`.
  async fn deliver(&self, title: &str, body: &str, destination: &str) -> Result<(), PlatformError> {
    match Destination::parse(destination) {
      Destination::Comment { thing_id } => self.post_comment(&thing_id, body).await,
      Destination::Post { subreddit } => self.submit_post(&subreddit, title, body).await,
      Destination::Message { to } => self.send_message(&to, title, body).await,
    }
  }
}

/// Used when no Reddit credentials are configured. Everything fails cleanly.
pub struct DisabledPlatform;

#[async_trait]
impl Platform for DisabledPlatform {
  fn oauth_url(&self, _state: &str) -> Result<String, PlatformError> {
    Err(PlatformError::NotConfigured)
  }

  async fn verify_identity(&self, _code: &str) -> Result<Identity, PlatformError> {
    Err(PlatformError::NotConfigured)
  }

  async fn send_message(&self, to: &str, _subject: &str, _body: &str) -> Result<(), PlatformError> {
    warn!(target: "platform", %to, "Dropping message: Reddit is not configured");
    Err(PlatformError::NotConfigured)
  }

  async fn submit_post(&self, subreddit: &str, _title: &str, _body: &str) -> Result<(), PlatformError> {
    warn!(target: "platform", %subreddit, "Dropping post: Reddit is not configured");
    Err(PlatformError::NotConfigured)
  }

  async fn post_comment(&self, thing_id: &str, _body: &str) -> Result<(), PlatformError> {
    warn!(target: "platform", %thing_id, "Dropping comment: Reddit is not configured");
    Err(PlatformError::NotConfigured)
  }
}

#[derive(Clone)]
pub struct OAuthApp {
  pub client_id: String,
  pub client_secret: String,
  pub redirect_uri: String,
}

#[derive(Clone)]
pub struct BotAccount {
  pub client_id: String,
  pub client_secret: String,
  pub username: String,
  pub password: String,
}

#[derive(Clone)]
pub struct RedditClient {
  pub client: reqwest::Client,
  pub user_agent: String,
  pub frontend: OAuthApp,
  pub bot: Option<BotAccount>,
}

#[derive(Deserialize)]
struct TokenResponse {
  #[serde(default)]
  access_token: Option<String>,
  #[serde(default)]
  error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Me {
  name: String,
  created: f64,
  link_karma: i64,
  comment_karma: i64,
  #[serde(default)]
  is_mod: bool,
  #[serde(default)]
  has_verified_email: Option<bool>,
}

#[derive(Deserialize)]
struct ApiEnvelope {
  json: ApiJson,
}

#[derive(Deserialize)]
struct ApiJson {
  #[serde(default)]
  errors: Vec<serde_json::Value>,
}

impl RedditClient {
  /// Construct the client if the frontend OAuth app is configured; otherwise None.
  /// The bot account is optional: without it, delivery fails with `NotConfigured`.
  pub fn from_env() -> Option<Self> {
    let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());

    let frontend = OAuthApp {
      client_id: var("REDDIT_FRONTEND_CLIENT_ID")?,
      client_secret: var("REDDIT_FRONTEND_CLIENT_SECRET")?,
      redirect_uri: var("REDDIT_FRONTEND_REDIRECT_URI")?,
    };
    let bot = match (
      var("REDDIT_BACKEND_CLIENT_ID"),
      var("REDDIT_BACKEND_CLIENT_SECRET"),
      var("REDDIT_BACKEND_USERNAME"),
      var("REDDIT_BACKEND_PASSWORD"),
    ) {
      (Some(client_id), Some(client_secret), Some(username), Some(password)) => {
        Some(BotAccount { client_id, client_secret, username, password })
      }
      _ => None,
    };
    let user_agent = var("REDDIT_USER_AGENT").unwrap_or_else(|| "gateform-backend/0.1".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .ok()?;

    Some(Self { client, user_agent, frontend, bot })
  }

  async fn fetch_token(&self, client_id: &str, secret: &str, form: &[(&str, &str)]) -> Result<String, PlatformError> {
    let res = self.client.post(TOKEN_URL)
      .header(USER_AGENT, &self.user_agent)
      .basic_auth(client_id, Some(secret))
      .form(form)
      .send().await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      return Err(PlatformError::Status { status, body: trunc_for_log(&body, 200) });
    }

    let token: TokenResponse = res.json().await?;
    match (token.access_token, token.error) {
      (Some(t), None) => Ok(t),
      (_, Some(e)) => Err(PlatformError::Rejected(e.to_string())),
      (None, None) => Err(PlatformError::Rejected("no access token in response".into())),
    }
  }

  async fn bot_token(&self) -> Result<String, PlatformError> {
    let bot = self.bot.as_ref().ok_or(PlatformError::NotConfigured)?;
    self.fetch_token(
      &bot.client_id,
      &bot.client_secret,
      &[("grant_type", "password"), ("username", bot.username.as_str()), ("password", bot.password.as_str())],
    ).await
  }

  /// POST a form to an OAuth API endpoint as the bot; checks `json.errors`.
  #[instrument(level = "info", skip(self, form))]
  async fn bot_post(&self, path: &str, form: &[(&str, &str)]) -> Result<(), PlatformError> {
    let token = self.bot_token().await?;
    let start = std::time::Instant::now();
    let res = self.client.post(format!("{OAUTH_BASE}{path}"))
      .header(USER_AGENT, &self.user_agent)
      .bearer_auth(token)
      .form(form)
      .send().await?;
    let elapsed = start.elapsed();

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      error!(target: "platform", %path, status, ?elapsed, "Reddit API call failed");
      return Err(PlatformError::Status { status, body: trunc_for_log(&body, 200) });
    }

    let envelope: ApiEnvelope = res.json().await?;
    if !envelope.json.errors.is_empty() {
      let errors = serde_json::Value::Array(envelope.json.errors).to_string();
      error!(target: "platform", %path, %errors, "Reddit rejected the request");
      return Err(PlatformError::Rejected(errors));
    }
    info!(target: "platform", %path, ?elapsed, "Reddit API call succeeded");
    Ok(())
  }
}

#[async_trait]
impl Platform for RedditClient {
  fn oauth_url(&self, state: &str) -> Result<String, PlatformError> {
    let url = Url::parse_with_params(
      AUTHORIZE_URL,
      &[
        ("client_id", self.frontend.client_id.as_str()),
        ("response_type", "code"),
        ("state", state),
        ("redirect_uri", self.frontend.redirect_uri.as_str()),
        ("duration", "temporary"),
        ("scope", "identity"),
      ],
    )
    .map_err(|e| PlatformError::Rejected(e.to_string()))?;
    Ok(url.into())
  }

  #[instrument(level = "info", skip_all)]
  async fn verify_identity(&self, code: &str) -> Result<Identity, PlatformError> {
    let token = self.fetch_token(
      &self.frontend.client_id,
      &self.frontend.client_secret,
      &[
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", self.frontend.redirect_uri.as_str()),
      ],
    ).await?;

    let res = self.client.get(format!("{OAUTH_BASE}/api/v1/me"))
      .header(USER_AGENT, &self.user_agent)
      .bearer_auth(token)
      .send().await?;
    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      return Err(PlatformError::Status { status, body: trunc_for_log(&body, 200) });
    }

    let me: Me = res.json().await?;
    info!(target: "platform", name = %me.name, "Identity verified");
    Ok(Identity {
      name: me.name,
      created: me.created as i64,
      link_karma: me.link_karma,
      comment_karma: me.comment_karma,
      is_mod: me.is_mod,
      has_verified_email: me.has_verified_email.unwrap_or(false),
    })
  }

  #[instrument(level = "info", skip(self, subject, body), fields(body = %trunc_for_log(body, 80)))]
  async fn send_message(&self, to: &str, subject: &str, body: &str) -> Result<(), PlatformError> {
    self.bot_post("/api/compose", &[("api_type", "json"), ("subject", subject), ("text", body), ("to", to)]).await
  }

  #[instrument(level = "info", skip(self, title, body), fields(%title))]
  async fn submit_post(&self, subreddit: &str, title: &str, body: &str) -> Result<(), PlatformError> {
    self.bot_post(
      "/api/submit",
      &[
        ("api_type", "json"),
        ("kind", "self"),
        ("sendreplies", "false"),
        ("sr", subreddit),
        ("text", body),
        ("title", title),
      ],
    ).await
  }

  #[instrument(level = "info", skip(self, body))]
  async fn post_comment(&self, thing_id: &str, body: &str) -> Result<(), PlatformError> {
    self.bot_post("/api/comment", &[("api_type", "json"), ("thing_id", thing_id), ("text", body)]).await
  }
}
