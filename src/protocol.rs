//! Public request/response structs for the HTTP API (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{FormInstance, UserRecord};
use crate::validate::RawAnswers;

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

/// Public homepage data.
#[derive(Serialize)]
pub struct SiteOut {
    pub site_title: String,
    pub welcome_body: String,
    pub accepting: bool,
    pub preview_allowed: bool,
    pub google_analytics_id: Option<String>,
    pub logged_in_as: Option<String>,
    pub form_mod: bool,
}

//
// Login
//

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

//
// Applicant form
//

#[derive(Debug, Default, Deserialize)]
pub struct FormQuery {
    #[serde(default)]
    pub simulate_failure: bool,
}

/// What an applicant sees on the form page.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FormView {
    /// The form is switched off by the moderators.
    Closed { message: String },
    /// The applicant does not meet the requirements.
    Ineligible { issues: Vec<String> },
    /// Fillable form (or, after a failed submit, the same form with errors).
    Open {
        instructions: String,
        questions: FormInstance,
    },
    /// Submission accepted.
    Submitted { success_url: String },
}

#[derive(Debug, Deserialize)]
pub struct SubmitIn {
    pub answers: RawAnswers,
}

//
// Moderator API
//

#[derive(Serialize)]
pub struct StatusOut {
    pub status: &'static str,
}

impl StatusOut {
    pub fn ok() -> Self {
        Self { status: "OK" }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct QueueOut {
    pub text: String,
    pub number: usize,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TextOut {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SettingIn {
    pub setting: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct UsernameIn {
    pub username: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearIn {
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsersQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub user: Option<String>,
    #[serde(rename = "mod")]
    pub is_mod: Option<String>,
    pub exempt: Option<String>,
}

/// A page of users plus links to the neighbouring pages.
#[derive(Debug, Serialize)]
pub struct UsersPage {
    pub users: Vec<UserSummary>,
    pub prev: Option<String>,
    pub next: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct UserSummary {
    pub username: String,
    pub form_mod: bool,
    pub is_exempt: bool,
    pub submitted: bool,
    pub processed: bool,
    pub combined_karma: i64,
    pub last_login: Option<i64>,
}

impl From<&UserRecord> for UserSummary {
    fn from(u: &UserRecord) -> Self {
        Self {
            username: u.username.clone(),
            form_mod: u.form_mod,
            is_exempt: u.is_exempt,
            submitted: u.submitted,
            processed: u.processed,
            combined_karma: u.combined_karma(),
            last_login: u.last_login,
        }
    }
}

/// Full view of one user's submission for moderators.
#[derive(Debug, Serialize)]
pub struct UserDetail {
    pub username: String,
    pub response_md: String,
    pub response_html: String,
    pub submitted: bool,
    pub processed: bool,
    pub last_login: Option<i64>,
    /// Set when the lookup matched a differently-cased username.
    pub show_warning: bool,
}
