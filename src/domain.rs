//! Domain models: question schema, per-user form instances, users and site settings.

use serde::{Deserialize, Serialize};

/// The closed set of question types a moderator can use.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
  Text,
  Textarea,
  Number,
  Radio,
  Checkbox,
  Dropdown,
}

impl QuestionType {
  pub const ALL: [QuestionType; 6] = [
    QuestionType::Text,
    QuestionType::Textarea,
    QuestionType::Number,
    QuestionType::Radio,
    QuestionType::Checkbox,
    QuestionType::Dropdown,
  ];

  /// Case-insensitive lookup; anything outside the closed set is `None`.
  pub fn parse(raw: &str) -> Option<Self> {
    let lower = raw.to_lowercase();
    Self::ALL.into_iter().find(|t| t.as_str() == lower)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      QuestionType::Text => "text",
      QuestionType::Textarea => "textarea",
      QuestionType::Number => "number",
      QuestionType::Radio => "radio",
      QuestionType::Checkbox => "checkbox",
      QuestionType::Dropdown => "dropdown",
    }
  }

  pub fn has_choices(self) -> bool {
    matches!(self, QuestionType::Radio | QuestionType::Checkbox | QuestionType::Dropdown)
  }

  /// `min`/`max` are meaningful for these types only.
  pub fn accepts_bounds(self) -> bool {
    matches!(
      self,
      QuestionType::Text | QuestionType::Textarea | QuestionType::Number | QuestionType::Checkbox
    )
  }
}

/// Validators for types that accept `min`/`max`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundedRules {
  #[serde(default, skip_serializing_if = "Option::is_none")] pub required: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub min: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub max: Option<i64>,
}

impl BoundedRules {
  pub fn is_empty(&self) -> bool {
    self.required.is_none() && self.min.is_none() && self.max.is_none()
  }
}

/// Validators for choice types where only `required` applies.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequiredRule {
  #[serde(default, skip_serializing_if = "Option::is_none")] pub required: Option<bool>,
}

impl RequiredRule {
  pub fn is_empty(&self) -> bool {
    self.required.is_none()
  }
}

/// Type-specific part of a question. `C` is the choice representation:
/// plain labels in the schema, token/label pairs in an instance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QuestionKind<C> {
  Text {
    #[serde(default, skip_serializing_if = "BoundedRules::is_empty")]
    validators: BoundedRules,
  },
  Textarea {
    #[serde(default, skip_serializing_if = "BoundedRules::is_empty")]
    validators: BoundedRules,
  },
  Number {
    #[serde(default, skip_serializing_if = "BoundedRules::is_empty")]
    validators: BoundedRules,
  },
  Radio {
    #[serde(default = "Vec::new", skip_serializing_if = "Vec::is_empty")]
    choices: Vec<C>,
    #[serde(default, skip_serializing_if = "RequiredRule::is_empty")]
    validators: RequiredRule,
  },
  Checkbox {
    #[serde(default = "Vec::new", skip_serializing_if = "Vec::is_empty")]
    choices: Vec<C>,
    #[serde(default, skip_serializing_if = "BoundedRules::is_empty")]
    validators: BoundedRules,
  },
  Dropdown {
    #[serde(default = "Vec::new", skip_serializing_if = "Vec::is_empty")]
    choices: Vec<C>,
    #[serde(default, skip_serializing_if = "RequiredRule::is_empty")]
    validators: RequiredRule,
  },
}

impl<C> QuestionKind<C> {
  pub fn question_type(&self) -> QuestionType {
    match self {
      QuestionKind::Text { .. } => QuestionType::Text,
      QuestionKind::Textarea { .. } => QuestionType::Textarea,
      QuestionKind::Number { .. } => QuestionType::Number,
      QuestionKind::Radio { .. } => QuestionType::Radio,
      QuestionKind::Checkbox { .. } => QuestionType::Checkbox,
      QuestionKind::Dropdown { .. } => QuestionType::Dropdown,
    }
  }

  pub fn choices(&self) -> &[C] {
    match self {
      QuestionKind::Radio { choices, .. }
      | QuestionKind::Checkbox { choices, .. }
      | QuestionKind::Dropdown { choices, .. } => choices,
      _ => &[],
    }
  }

  pub fn required(&self) -> bool {
    let flag = match self {
      QuestionKind::Text { validators }
      | QuestionKind::Textarea { validators }
      | QuestionKind::Number { validators }
      | QuestionKind::Checkbox { validators, .. } => validators.required,
      QuestionKind::Radio { validators, .. } | QuestionKind::Dropdown { validators, .. } => {
        validators.required
      }
    };
    flag.unwrap_or(false)
  }

  /// `(min, max)` bounds, always `(None, None)` for radio/dropdown.
  pub fn bounds(&self) -> (Option<i64>, Option<i64>) {
    match self {
      QuestionKind::Text { validators }
      | QuestionKind::Textarea { validators }
      | QuestionKind::Number { validators }
      | QuestionKind::Checkbox { validators, .. } => (validators.min, validators.max),
      _ => (None, None),
    }
  }

  /// Rebuild the same kind with a different choice representation.
  pub fn map_choices<D>(self, mut f: impl FnMut(C) -> D) -> QuestionKind<D> {
    match self {
      QuestionKind::Text { validators } => QuestionKind::Text { validators },
      QuestionKind::Textarea { validators } => QuestionKind::Textarea { validators },
      QuestionKind::Number { validators } => QuestionKind::Number { validators },
      QuestionKind::Radio { choices, validators } => QuestionKind::Radio {
        choices: choices.into_iter().map(&mut f).collect(),
        validators,
      },
      QuestionKind::Checkbox { choices, validators } => QuestionKind::Checkbox {
        choices: choices.into_iter().map(&mut f).collect(),
        validators,
      },
      QuestionKind::Dropdown { choices, validators } => QuestionKind::Dropdown {
        choices: choices.into_iter().map(&mut f).collect(),
        validators,
      },
    }
  }
}

/// A sanitized question as stored in the site schema.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalQuestion {
  pub text: String,
  pub priority: i64,
  #[serde(flatten)]
  pub kind: QuestionKind<String>,
}

/// Canonical question list (ascending priority) plus the number of tokens an
/// instance of it needs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
  pub questions: Vec<CanonicalQuestion>,
  pub required_tokens: usize,
}

impl Schema {
  /// Build from already-canonical questions, recomputing the token count.
  pub fn from_questions(questions: Vec<CanonicalQuestion>) -> Self {
    let required_tokens = required_token_count(&questions);
    Self { questions, required_tokens }
  }
}

/// One token per question plus one per choice.
pub fn required_token_count(questions: &[CanonicalQuestion]) -> usize {
  questions.iter().map(|q| 1 + q.kind.choices().len()).sum()
}

/// A choice inside an instance, bound to its anti-replay token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Choice {
  pub token: String,
  pub label: String,
}

/// The applicant's answer to one question.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Response {
  #[default]
  Missing,
  Number(i64),
  Text(String),
  Choices(Vec<String>),
}

impl Response {
  /// What `required` considers unanswered. `0` is an answer.
  pub fn is_empty(&self) -> bool {
    match self {
      Response::Missing => true,
      Response::Number(_) => false,
      Response::Text(s) => s.is_empty(),
      Response::Choices(v) => v.is_empty(),
    }
  }
}

/// A question inside a user's form instance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceQuestion {
  pub token: String,
  pub text: String,
  pub priority: i64,
  #[serde(flatten)]
  pub kind: QuestionKind<Choice>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub validator_words: Vec<String>,
  #[serde(default)]
  pub response: Response,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<String>,
}

impl InstanceQuestion {
  pub fn label_for(&self, token: &str) -> Option<&str> {
    self.kind
      .choices()
      .iter()
      .find(|c| c.token == token)
      .map(|c| c.label.as_str())
  }
}

/// A user's stateful copy of the schema.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FormInstance {
  pub questions: Vec<InstanceQuestion>,
}

impl FormInstance {
  /// Every question and choice token in the instance.
  pub fn tokens(&self) -> impl Iterator<Item = &str> {
    self.questions.iter().flat_map(|q| {
      std::iter::once(q.token.as_str()).chain(q.kind.choices().iter().map(|c| c.token.as_str()))
    })
  }
}

/// Account data returned by the identity provider.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
  pub name: String,
  pub created: i64,
  pub link_karma: i64,
  pub comment_karma: i64,
  pub is_mod: bool,
  pub has_verified_email: bool,
}

/// A site user (applicant and/or form moderator).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
  pub id: u64,
  pub username: String,
  pub post_karma: i64,
  pub comment_karma: i64,
  pub created_utc: i64,
  pub is_mod: bool,
  pub verified_email: bool,
  #[serde(default)] pub form_mod: bool,
  #[serde(default)] pub api_key: Option<String>,
  /// Serialized `FormInstance`; empty when none is in progress.
  #[serde(default)] pub response: String,
  #[serde(default)] pub full_body_md: String,
  #[serde(default)] pub full_body_html: String,
  #[serde(default)] pub response_title: String,
  #[serde(default)] pub submitted: bool,
  #[serde(default)] pub processed: bool,
  /// Claimed by an in-flight delivery.
  #[serde(skip)] pub delivering: bool,
  #[serde(default)] pub is_exempt: bool,
  #[serde(default)] pub last_login: Option<i64>,
  #[serde(default)] pub last_api_access: Option<i64>,
}

impl UserRecord {
  pub fn from_identity(id: u64, identity: &Identity) -> Self {
    Self {
      id,
      username: identity.name.clone(),
      post_karma: identity.link_karma,
      comment_karma: identity.comment_karma,
      created_utc: identity.created,
      is_mod: identity.is_mod,
      verified_email: identity.has_verified_email,
      form_mod: false,
      api_key: None,
      response: String::new(),
      full_body_md: String::new(),
      full_body_html: String::new(),
      response_title: String::new(),
      submitted: false,
      processed: false,
      delivering: false,
      is_exempt: false,
      last_login: None,
      last_api_access: None,
    }
  }

  /// Refresh platform-owned fields after a new login.
  pub fn refresh(&mut self, identity: &Identity) {
    self.post_karma = identity.link_karma;
    self.comment_karma = identity.comment_karma;
    self.created_utc = identity.created;
    self.is_mod = identity.is_mod;
    self.verified_email = identity.has_verified_email;
  }

  pub fn combined_karma(&self) -> i64 {
    self.post_karma + self.comment_karma
  }
}

/// Site-wide settings singleton. Defaults match a freshly installed site.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
  pub accepting: bool,
  pub site_title: String,
  pub welcome_body: String,
  pub instructions: String,
  #[serde(skip)]
  pub schema: Schema,
  pub min_karma: i64,
  /// Minimum account age in seconds.
  pub min_age: i64,
  pub min_age_word: String,
  pub expose_mins: bool,
  pub preview_allowed: bool,
  pub destination_id: String,
  pub response_title: String,
  pub response_body: String,
  pub message_user: bool,
  pub message_subject: String,
  pub message_body: String,
  pub success_url: String,
  pub contact_destination: String,
  pub google_analytics_enabled: bool,
  pub google_analytics_id: String,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      accepting: false,
      site_title: "subreddit form site".into(),
      welcome_body: "welcome to the form site!".into(),
      instructions: "Please fill this form out.".into(),
      schema: Schema::default(),
      min_karma: -100,
      min_age: -100,
      min_age_word: String::new(),
      expose_mins: true,
      preview_allowed: true,
      destination_id: String::new(),
      response_title: "u/{username}".into(),
      response_body: "{response}".into(),
      message_user: true,
      message_subject: "Form submission received".into(),
      message_body: "Hi {username}, we have received your submission.".into(),
      success_url: "https://www.reddit.com/".into(),
      contact_destination: "me".into(),
      google_analytics_enabled: false,
      google_analytics_id: String::new(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn question_type_parse_is_case_insensitive() {
    assert_eq!(QuestionType::parse("CheckBox"), Some(QuestionType::Checkbox));
    assert_eq!(QuestionType::parse("textarea"), Some(QuestionType::Textarea));
    assert_eq!(QuestionType::parse("slider"), None);
  }

  #[test]
  fn canonical_question_serializes_flat() {
    let q = CanonicalQuestion {
      text: "Pick one".into(),
      priority: 2,
      kind: QuestionKind::Radio {
        choices: vec!["a".into(), "b".into()],
        validators: RequiredRule { required: Some(true) },
      },
    };
    let v = serde_json::to_value(&q).unwrap();
    assert_eq!(
      v,
      json!({"text": "Pick one", "priority": 2, "type": "radio", "choices": ["a", "b"], "validators": {"required": true}})
    );
    let back: CanonicalQuestion = serde_json::from_value(v).unwrap();
    assert_eq!(back, q);
  }

  #[test]
  fn empty_rules_and_choices_are_omitted() {
    let q = CanonicalQuestion {
      text: "Name".into(),
      priority: 1,
      kind: QuestionKind::Text { validators: BoundedRules::default() },
    };
    assert_eq!(
      serde_json::to_value(&q).unwrap(),
      json!({"text": "Name", "priority": 1, "type": "text"})
    );
  }

  #[test]
  fn response_shapes_follow_json() {
    assert_eq!(serde_json::to_value(Response::Missing).unwrap(), json!(null));
    let r: Response = serde_json::from_value(json!(["x", "y"])).unwrap();
    assert_eq!(r, Response::Choices(vec!["x".into(), "y".into()]));
    let r: Response = serde_json::from_value(json!(0)).unwrap();
    assert_eq!(r, Response::Number(0));
    assert!(!r.is_empty());
    assert!(Response::Text(String::new()).is_empty());
  }

  #[test]
  fn token_count_counts_choices() {
    let questions = vec![
      CanonicalQuestion {
        text: "a".into(),
        priority: 1,
        kind: QuestionKind::Text { validators: BoundedRules::default() },
      },
      CanonicalQuestion {
        text: "b".into(),
        priority: 2,
        kind: QuestionKind::Checkbox {
          choices: vec!["x".into(), "y".into(), "z".into()],
          validators: BoundedRules::default(),
        },
      },
    ];
    assert_eq!(required_token_count(&questions), 5);
  }
}
