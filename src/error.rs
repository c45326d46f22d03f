//! Error taxonomy for the form pipeline and its HTTP surface.
//!
//! Schema and template errors are moderator-facing configuration problems,
//! validation errors are collected per question and never abort a submission,
//! domain errors are broken preconditions on numeric input.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

/// Malformed moderator-submitted question data.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("question data must be a JSON array of question objects")]
    NotAnArray,
    #[error("question #{index} is not a JSON object")]
    NotAnObject { index: usize },
    #[error("question #{index} is missing the `{field}` field")]
    MissingField { index: usize, field: &'static str },
    #[error("question #{index} has a `text` field that is not a string")]
    InvalidText { index: usize },
    #[error("question #{index} has a priority that is not a whole number")]
    InvalidPriority { index: usize },
    #[error("priority {priority} is used by both question #{first} and question #{second}")]
    DuplicatePriority { priority: i64, first: usize, second: usize },
    #[error("no priority is left after {after} for questions without an explicit one")]
    PriorityOverflow { after: i64 },
}

/// A single problem with one submitted answer. Rendered inline next to the question.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Response was too short. Minimum length is {0} characters.")]
    TooShort(i64),
    #[error("Response was too long. Maximum length is {0} characters.")]
    TooLong(i64),
    #[error("Response was too small. Number must be greater than {0}.")]
    TooSmall(i64),
    #[error("Response was too large. Number must be smaller than {0}.")]
    TooLarge(i64),
    #[error("Response was too short. At least {0} checkboxes must be checked.")]
    TooFewChecked(i64),
    #[error("Response was too long. No more than {0} checkboxes may be checked.")]
    TooManyChecked(i64),
    #[error("A reply to this question is required.")]
    Required,
    #[error("Response must be a whole number.")]
    NotANumber,
}

/// Moderator-authored output template that cannot be rendered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder `{{{0}}}`")]
    UnknownPlaceholder(String),
    #[error("positional placeholder `{{{0}}}` is not supported, use a named one")]
    PositionalPlaceholder(String),
    #[error("placeholder `{{{0}}}` uses a conversion or format spec, which is not supported")]
    UnsupportedSpec(String),
    #[error("single `{{` at byte {0} is not closed; write `{{{{` for a literal brace")]
    UnclosedBrace(usize),
    #[error("single `}}` at byte {0} has no opening brace; write `}}}}` for a literal brace")]
    StrayClosingBrace(usize),
}

/// Numeric or time input outside the domain a function is defined on.
#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("duration must be at least one second, got {0}")]
    DurationTooShort(f64),
}

/// Failure while rendering a finished submission.
#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Failure talking to the external platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform credentials are not configured")]
    NotConfigured,
    #[error("platform request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("platform rejected the request: {0}")]
    Rejected(String),
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("invalid template for `{setting}`: {source}")]
    Template {
        setting: String,
        #[source]
        source: TemplateError,
    },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("{0}")]
    BadRequest(String),
    #[error("login required")]
    Unauthorized { next: String },
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(String),
    #[error("stored data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Schema(_) | AppError::Template { .. } | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Platform(_) => StatusCode::BAD_GATEWAY,
            AppError::Format(_) | AppError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Schema(_) | AppError::Template { .. } | AppError::BadRequest(_) => {
                serde_json::json!({ "message": self.to_string() })
            }
            AppError::Unauthorized { next } => serde_json::json!({
                "error": status.as_u16(),
                "login": format!("/auth?next={next}"),
            }),
            AppError::Forbidden | AppError::NotFound(_) => {
                serde_json::json!({ "error": status.as_u16(), "message": self.to_string() })
            }
            _ => {
                error!(target: "gateform", error = %self, "Request failed");
                serde_json::json!({
                    "error": status.as_u16(),
                    "message": "An error occurred when attempting to serve this page.",
                })
            }
        };
        (status, Json(body)).into_response()
    }
}
