//! Rendering a validated form instance into the moderator-configured output.
//!
//! Templates use named `{placeholder}` fields, with `{{` and `}}` for literal
//! braces. Unknown fields are errors, so a broken template is reported to the
//! moderator instead of producing half-filled text.

use pulldown_cmark::{html, Parser};
use tracing::{debug, instrument};

use crate::age::age_to_words;
use crate::domain::{FormInstance, Response, UserRecord};
use crate::error::{FormatError, TemplateError};

/// Placeholders available in every template.
pub const PROFILE_FIELDS: [&str; 7] = [
  "username",
  "post_karma",
  "comment_karma",
  "combined_karma",
  "age",
  "is_verified",
  "is_mod",
];

/// Only the response body template may use the transcript.
pub const RESPONSE_FIELD: &str = "response";

/// Facts about the applicant that templates can reference.
#[derive(Clone, Debug, PartialEq)]
pub struct ApplicantContext {
  pub username: String,
  pub post_karma: i64,
  pub comment_karma: i64,
  pub account_age_seconds: f64,
  pub is_verified: bool,
  pub is_mod: bool,
}

impl ApplicantContext {
  pub fn from_user(user: &UserRecord, now: i64) -> Self {
    Self {
      username: user.username.clone(),
      post_karma: user.post_karma,
      comment_karma: user.comment_karma,
      account_age_seconds: (now - user.created_utc) as f64,
      is_verified: user.verified_email,
      is_mod: user.is_mod,
    }
  }

  fn profile_vars(&self, age: String) -> Vec<(&'static str, String)> {
    vec![
      ("username", self.username.clone()),
      ("post_karma", self.post_karma.to_string()),
      ("comment_karma", self.comment_karma.to_string()),
      ("combined_karma", (self.post_karma + self.comment_karma).to_string()),
      ("age", age),
      ("is_verified", py_bool(self.is_verified).to_string()),
      ("is_mod", py_bool(self.is_mod).to_string()),
    ]
  }
}

// Templates written for the old site expect capitalized booleans.
fn py_bool(b: bool) -> &'static str {
  if b { "True" } else { "False" }
}

#[derive(Clone, Copy, Debug)]
pub struct ResponseTemplates<'a> {
  pub body: &'a str,
  pub title: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedResponse {
  pub body_markdown: String,
  pub body_html: String,
  pub title: String,
}

/// Render the final submission body (Markdown + HTML) and title.
#[instrument(level = "debug", skip_all, fields(username = %context.username, questions = instance.questions.len()))]
pub fn format(
  instance: &FormInstance,
  templates: ResponseTemplates<'_>,
  context: &ApplicantContext,
) -> Result<RenderedResponse, FormatError> {
  let age = age_to_words(context.account_age_seconds)?;
  let mut vars = context.profile_vars(age);
  let title = fill(templates.title, &vars)?;

  vars.push((RESPONSE_FIELD, transcript(instance)));
  let body_markdown = fill(templates.body, &vars)?;
  let body_html = markdown_to_html(&body_markdown);

  debug!(target: "form", md_len = body_markdown.len(), "Submission rendered");
  Ok(RenderedResponse { body_markdown, body_html, title })
}

/// Render a template that only sees the applicant profile (subjects, messages).
pub fn render_message(template: &str, context: &ApplicantContext) -> Result<String, FormatError> {
  let age = age_to_words(context.account_age_seconds)?;
  Ok(fill(template, &context.profile_vars(age))?)
}

/// Dry-run a moderator template before it is saved.
pub fn check_template(template: &str, allow_response: bool) -> Result<(), TemplateError> {
  let mut vars: Vec<(&str, String)> = PROFILE_FIELDS.iter().map(|f| (*f, String::new())).collect();
  if allow_response {
    vars.push((RESPONSE_FIELD, String::new()));
  }
  fill(template, &vars).map(|_| ())
}

/// Numbered questions, each followed by its answer as a blockquote.
pub fn transcript(instance: &FormInstance) -> String {
  let mut out = String::new();
  for (n, question) in instance.questions.iter().enumerate() {
    out.push_str(&format!("\n**{}. {}**\n\n", n + 1, question.text));
    match &question.response {
      Response::Choices(items) => {
        let lines: Vec<String> = items.iter().map(|item| format!(">* {item}")).collect();
        out.push_str(&lines.join("\n"));
      }
      Response::Text(text) => out.push_str(&quote_lines(text)),
      Response::Number(n) => out.push_str(&quote_lines(&n.to_string())),
      Response::Missing => {}
    }
    out.push('\n');
  }
  out
}

fn quote_lines(text: &str) -> String {
  text
    .lines()
    .map(|line| format!("> {line}"))
    .collect::<Vec<_>>()
    .join("\n\n")
}

pub fn markdown_to_html(markdown: &str) -> String {
  let mut out = String::with_capacity(markdown.len() * 3 / 2);
  html::push_html(&mut out, Parser::new(markdown));
  out
}

/// Substitute `{name}` fields from `vars`.
pub fn fill(template: &str, vars: &[(&str, String)]) -> Result<String, TemplateError> {
  let mut out = String::with_capacity(template.len());
  let mut rest = template.char_indices().peekable();

  while let Some((pos, ch)) = rest.next() {
    match ch {
      '{' => {
        if rest.next_if(|&(_, c)| c == '{').is_some() {
          out.push('{');
          continue;
        }
        let start = pos + 1;
        let end = template[start..]
          .find('}')
          .map(|i| start + i)
          .ok_or(TemplateError::UnclosedBrace(pos))?;
        let field = &template[start..end];
        if field.contains('{') {
          return Err(TemplateError::UnclosedBrace(pos));
        }
        out.push_str(lookup(field, vars)?);
        while rest.next_if(|&(i, _)| i <= end).is_some() {}
      }
      '}' => {
        if rest.next_if(|&(_, c)| c == '}').is_none() {
          return Err(TemplateError::StrayClosingBrace(pos));
        }
        out.push('}');
      }
      _ => out.push(ch),
    }
  }
  Ok(out)
}

fn lookup<'v>(field: &str, vars: &'v [(&str, String)]) -> Result<&'v str, TemplateError> {
  if field.contains('!') || field.contains(':') {
    return Err(TemplateError::UnsupportedSpec(field.to_string()));
  }
  if field.is_empty() || field.chars().all(|c| c.is_ascii_digit()) {
    return Err(TemplateError::PositionalPlaceholder(field.to_string()));
  }
  vars
    .iter()
    .find(|(name, _)| *name == field)
    .map(|(_, value)| value.as_str())
    .ok_or_else(|| TemplateError::UnknownPlaceholder(field.to_string()))
}
