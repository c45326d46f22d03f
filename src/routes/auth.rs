//! Request authentication as axum extractors.
//!
//! A request is logged in either by the session cookie set during OAuth login
//! or by a moderator API key (`X-Api-Key` header or `?key=` query). The cookie
//! wins when both are present. Browser logins refresh `last_login`, key logins
//! refresh `last_api_access`.

use std::{convert::Infallible, sync::Arc};

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{header::COOKIE, request::Parts, HeaderMap},
};
use serde::Deserialize;
use tracing::debug;

use crate::domain::UserRecord;
use crate::error::AppError;
use crate::state::AppState;
use crate::util::now_ts;

pub const SESSION_COOKIE: &str = "gateform_session";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Value for `Set-Cookie` that binds the browser to `session_id`.
pub fn session_cookie(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// The session id from the `Cookie` header(s), if any.
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

fn api_key(parts: &Parts) -> Option<String> {
    if let Some(v) = parts.headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(v.to_string());
    }
    Query::<KeyQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.key)
        .filter(|k| !k.is_empty())
}

/// Who is making the request.
#[derive(Clone, Debug)]
pub struct Login {
    pub user: UserRecord,
    pub via_api_key: bool,
}

async fn authenticate(parts: &Parts, state: &AppState) -> Option<Login> {
    if let Some(id) = session_id(&parts.headers) {
        if let Some(username) = state.session(&id).await.and_then(|s| s.username) {
            let mut users = state.users.write().await;
            if let Some(user) = users.get_mut(&username) {
                user.last_login = Some(now_ts());
                return Some(Login { user: user.clone(), via_api_key: false });
            }
        }
    }

    let key = api_key(parts)?;
    let found = state.user_by_api_key(&key).await;
    let Some(found) = found else {
        debug!(target: "gateform", "Unknown API key");
        return None;
    };
    let mut users = state.users.write().await;
    let user = users.get_mut(&found.username)?;
    user.last_api_access = Some(now_ts());
    Some(Login { user: user.clone(), via_api_key: true })
}

fn login_required(parts: &Parts) -> AppError {
    AppError::Unauthorized { next: parts.uri.path().to_string() }
}

/// Optional login; never rejects.
pub struct Viewer(pub Option<UserRecord>);

/// A logged-in browser user.
pub struct Applicant(pub UserRecord);

/// A form moderator, by session or API key.
pub struct Moderator(pub UserRecord);

/// A form moderator logged in through the browser; API keys are refused.
pub struct BrowserModerator(pub UserRecord);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        Ok(Viewer(authenticate(parts, state).await.map(|l| l.user)))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Applicant {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match authenticate(parts, state).await {
            Some(Login { via_api_key: true, .. }) => Err(AppError::Forbidden),
            Some(Login { user, .. }) => Ok(Applicant(user)),
            None => Err(login_required(parts)),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Moderator {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match authenticate(parts, state).await {
            Some(Login { user, .. }) if user.form_mod => Ok(Moderator(user)),
            Some(_) => Err(AppError::Forbidden),
            None => Err(login_required(parts)),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for BrowserModerator {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match authenticate(parts, state).await {
            Some(Login { user, via_api_key: false }) if user.form_mod => Ok(BrowserModerator(user)),
            Some(_) => Err(AppError::Forbidden),
            None => Err(login_required(parts)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn finds_session_among_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; gateform_session=abc-123; other=1"));
        assert_eq!(session_id(&headers).as_deref(), Some("abc-123"));

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("gateform_session="));
        assert_eq!(session_id(&headers), None);
        assert_eq!(session_id(&HeaderMap::new()), None);
    }

    #[test]
    fn cookie_round_trips() {
        let mut headers = HeaderMap::new();
        let value = session_cookie("s1");
        let pair = value.split(';').next().unwrap().to_string();
        headers.insert(COOKIE, HeaderValue::from_str(&pair).unwrap());
        assert_eq!(session_id(&headers).as_deref(), Some("s1"));
        assert!(expired_session_cookie().contains("Max-Age=0"));
    }
}
