//! Application state: settings singleton, user store, login sessions and the platform client.
//!
//! This module owns:
//!   - the site settings (including the active question schema)
//!   - users keyed by lowercase username, each holding their form instance blob
//!   - browser sessions (OAuth state + logged-in username)
//!   - the `Platform` used for login and delivery
//!
//! Everything lives in memory behind tokio `RwLock`s. Settings updates are
//! last-write-wins; moderators editing at the same moment overwrite each other.

use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{load_site_config_from_env, SiteConfig};
use crate::domain::{Identity, Schema, Settings, UserRecord};
use crate::format::check_template;
use crate::reddit::{DisabledPlatform, Platform, RedditClient};
use crate::schema::sanitize;
use crate::seeds::{example_questions, example_response_body};
use crate::util::{now_ts, random_alnum};

pub const API_KEY_LEN: usize = 32;

/// A browser session, created when the login flow starts.
#[derive(Clone, Debug, Default)]
pub struct Session {
    /// Random value sent through OAuth and checked on the callback.
    pub oauth_state: String,
    /// Local path to return to after login.
    pub next: String,
    pub username: Option<String>,
}

#[derive(Debug, Default)]
pub struct UserStore {
    by_name: HashMap<String, UserRecord>,
    next_id: u64,
}

impl UserStore {
    pub fn get(&self, username: &str) -> Option<&UserRecord> {
        self.by_name.get(&username.to_lowercase())
    }

    pub fn get_mut(&mut self, username: &str) -> Option<&mut UserRecord> {
        self.by_name.get_mut(&username.to_lowercase())
    }

    pub fn insert(&mut self, user: UserRecord) {
        self.by_name.insert(user.username.to_lowercase(), user);
    }

    pub fn values(&self) -> impl Iterator<Item = &UserRecord> {
        self.by_name.values()
    }

    pub fn retain(&mut self, keep: impl FnMut(&String, &mut UserRecord) -> bool) {
        self.by_name.retain(keep);
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Give `username` a fresh API key that no other user holds.
    pub fn issue_api_key(&mut self, username: &str) -> Option<String> {
        let mut rng = rand::thread_rng();
        let key = loop {
            let candidate = random_alnum(&mut rng, API_KEY_LEN);
            if !self.values().any(|u| u.api_key.as_deref() == Some(candidate.as_str())) {
                break candidate;
            }
        };
        let user = self.get_mut(username)?;
        user.api_key = Some(key.clone());
        Some(key)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RwLock<Settings>>,
    pub users: Arc<RwLock<UserStore>>,
    pub sessions: Arc<RwLock<HashMap<String, Session>>>,
    pub platform: Arc<dyn Platform>,
}

impl AppState {
    /// Build state from env: load site config, sanitize initial questions, init Reddit.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let settings = initial_settings(load_site_config_from_env());

        let platform: Arc<dyn Platform> = match RedditClient::from_env() {
            Some(client) => {
                info!(target: "gateform", user_agent = %client.user_agent, bot = client.bot.is_some(), "Reddit enabled.");
                Arc::new(client)
            }
            None => {
                warn!(target: "gateform", "Reddit disabled (REDDIT_FRONTEND_* not set). Login and delivery will fail.");
                Arc::new(DisabledPlatform)
            }
        };

        Self::with_platform(settings, platform)
    }

    pub fn with_platform(settings: Settings, platform: Arc<dyn Platform>) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
            users: Arc::new(RwLock::new(UserStore::default())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            platform,
        }
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn user(&self, username: &str) -> Option<UserRecord> {
        self.users.read().await.get(username).cloned()
    }

    pub async fn user_by_api_key(&self, key: &str) -> Option<UserRecord> {
        let users = self.users.read().await;
        let found = users.values().find(|u| u.api_key.as_deref() == Some(key)).cloned();
        found
    }

    /// Create or refresh the user behind a verified identity.
    /// The very first account on a new site becomes a form moderator.
    #[instrument(level = "info", skip(self, identity), fields(name = %identity.name))]
    pub async fn upsert_identity(&self, identity: &Identity) -> UserRecord {
        let mut users = self.users.write().await;
        if let Some(existing) = users.get_mut(&identity.name) {
            existing.refresh(identity);
            existing.last_login = Some(now_ts());
            return existing.clone();
        }

        let id = users.next_id();
        let mut user = UserRecord::from_identity(id, identity);
        user.last_login = Some(now_ts());
        let first = users.is_empty();
        user.form_mod = first;
        users.insert(user);
        if first {
            users.issue_api_key(&identity.name);
            info!(target: "moderation", name = %identity.name, "First user promoted to form moderator");
        }
        users.get(&identity.name).cloned().unwrap_or_else(|| UserRecord::from_identity(id, identity))
    }

    /// Start a login: new session id with a random OAuth state.
    pub async fn create_session(&self, next: String) -> (String, Session) {
        let id = Uuid::new_v4().to_string();
        let session = Session { oauth_state: Uuid::new_v4().to_string(), next, username: None };
        self.sessions.write().await.insert(id.clone(), session.clone());
        (id, session)
    }

    pub async fn session(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn bind_session(&self, id: &str, username: &str) {
        if let Some(s) = self.sessions.write().await.get_mut(id) {
            s.username = Some(username.to_string());
        }
    }

    pub async fn drop_session(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }
}

/// Settings for a fresh process: config overrides, then the configured or example questions.
pub fn initial_settings(cfg: Option<SiteConfig>) -> Settings {
    let cfg = cfg.unwrap_or_default();
    let mut settings = match cfg.settings {
        Some(s) => s,
        None => Settings { response_body: example_response_body(), ..Settings::default() },
    };

    let raw = cfg
        .questions
        .map(serde_json::Value::Array)
        .unwrap_or_else(example_questions);
    settings.schema = match sanitize(&raw) {
        Ok(schema) => schema,
        Err(e) => {
            error!(target: "gateform", error = %e, "Configured questions are invalid; starting with an empty form");
            Schema::default()
        }
    };

    if settings.min_age > 0 && settings.min_age_word.is_empty() {
        if let Ok(word) = crate::age::age_to_words(settings.min_age as f64) {
            settings.min_age_word = word;
        }
    }

    for (name, template, allow_response) in [
        ("response_body", &settings.response_body, true),
        ("response_title", &settings.response_title, false),
        ("message_subject", &settings.message_subject, false),
        ("message_body", &settings.message_body, false),
    ] {
        if let Err(e) = check_template(template, allow_response) {
            error!(target: "gateform", setting = name, error = %e, "Configured template is invalid");
        }
    }

    info!(target: "gateform", questions = settings.schema.questions.len(), required_tokens = settings.schema.required_tokens, accepting = settings.accepting, "Site settings ready");
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> Identity {
        Identity {
            name: name.into(),
            created: 1_600_000_000,
            link_karma: 1,
            comment_karma: 2,
            is_mod: false,
            has_verified_email: true,
        }
    }

    fn state() -> AppState {
        AppState::with_platform(Settings::default(), Arc::new(DisabledPlatform))
    }

    #[tokio::test]
    async fn first_user_becomes_moderator() {
        let state = state();
        let first = state.upsert_identity(&identity("Alice")).await;
        assert!(first.form_mod);
        assert_eq!(first.api_key.as_ref().map(String::len), Some(API_KEY_LEN));

        let second = state.upsert_identity(&identity("bob")).await;
        assert!(!second.form_mod);
        assert!(second.api_key.is_none());
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn relogin_refreshes_without_duplicating() {
        let state = state();
        state.upsert_identity(&identity("Alice")).await;
        let mut changed = identity("alice");
        changed.link_karma = 999;
        let user = state.upsert_identity(&changed).await;
        assert_eq!(user.post_karma, 999);
        assert_eq!(user.username, "Alice");
        assert_eq!(state.users.read().await.len(), 1);
    }

    #[tokio::test]
    async fn api_key_lookup() {
        let state = state();
        let alice = state.upsert_identity(&identity("alice")).await;
        let key = alice.api_key.unwrap();
        assert_eq!(state.user_by_api_key(&key).await.map(|u| u.username), Some("alice".into()));
        assert!(state.user_by_api_key("nope").await.is_none());
    }

    #[tokio::test]
    async fn sessions_bind_usernames() {
        let state = state();
        let (id, session) = state.create_session("/form".into()).await;
        assert!(session.username.is_none());
        assert_eq!(session.next, "/form");
        state.bind_session(&id, "alice").await;
        assert_eq!(state.session(&id).await.unwrap().username.as_deref(), Some("alice"));
        state.drop_session(&id).await;
        assert!(state.session(&id).await.is_none());
    }

    #[test]
    fn fresh_site_uses_example_questions() {
        let settings = initial_settings(None);
        assert_eq!(settings.schema.questions.len(), 6);
        assert!(settings.response_body.contains("{response}"));
    }

    #[test]
    fn broken_config_questions_fall_back_to_empty() {
        let cfg = SiteConfig {
            settings: Some(Settings { min_age: 86_400, ..Settings::default() }),
            questions: Some(vec![serde_json::json!({"type": "text"})]),
        };
        let settings = initial_settings(Some(cfg));
        assert!(settings.schema.questions.is_empty());
        assert_eq!(settings.min_age_word, "1 day");
    }
}
