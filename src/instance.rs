//! Expanding a schema into a per-user form instance.
//!
//! Every question and choice gets a short random token so submissions can only
//! reference the instance that was served to that user.

use std::collections::{HashSet, VecDeque};

use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::domain::{
  CanonicalQuestion, Choice, FormInstance, InstanceQuestion, QuestionKind, Response, Schema,
};

pub const TOKEN_LEN: usize = 4;

/// Distinct tokens waiting to be handed out, in generation order.
#[derive(Debug)]
pub struct TokenPool {
  tokens: VecDeque<String>,
}

impl TokenPool {
  /// Draw `count` distinct tokens, redrawing on collision.
  pub fn generate<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Self {
    let mut seen = HashSet::with_capacity(count);
    let mut tokens = VecDeque::with_capacity(count);
    while tokens.len() < count {
      let candidate = crate::util::random_alnum(rng, TOKEN_LEN);
      if seen.insert(candidate.clone()) {
        tokens.push_back(candidate);
      }
    }
    Self { tokens }
  }

  pub fn len(&self) -> usize {
    self.tokens.len()
  }

  /// Next token; tops the pool up with a fresh distinct one if it ran dry.
  fn take<R: Rng + ?Sized>(&mut self, rng: &mut R, issued: &mut HashSet<String>) -> String {
    loop {
      let token = self
        .tokens
        .pop_front()
        .unwrap_or_else(|| crate::util::random_alnum(rng, TOKEN_LEN));
      if issued.insert(token.clone()) {
        return token;
      }
    }
  }
}

/// Build a fresh instance of `schema` with random tokens.
pub fn expand(schema: &Schema) -> FormInstance {
  expand_with(schema, &mut rand::thread_rng())
}

#[instrument(level = "debug", skip_all, fields(questions = schema.questions.len(), required_tokens = schema.required_tokens))]
pub fn expand_with<R: Rng + ?Sized>(schema: &Schema, rng: &mut R) -> FormInstance {
  let needed = crate::domain::required_token_count(&schema.questions);
  if needed != schema.required_tokens {
    warn!(target: "form", stored = schema.required_tokens, needed, "Stored token count is stale; using the schema's own count");
  }

  let mut pool = TokenPool::generate(rng, needed);
  let mut issued = HashSet::with_capacity(needed);
  let questions = schema
    .questions
    .iter()
    .map(|q| {
      let token = pool.take(rng, &mut issued);
      let kind = q.kind.clone().map_choices(|label| Choice {
        token: pool.take(rng, &mut issued),
        label,
      });
      instance_question(q, token, kind)
    })
    .collect();

  debug!(target: "form", tokens = issued.len(), unused = pool.len(), "Form instance expanded");
  FormInstance { questions }
}

/// View-only instance: no tokens, nothing answerable.
pub fn preview(schema: &Schema) -> FormInstance {
  let questions = schema
    .questions
    .iter()
    .map(|q| {
      let kind = q.kind.clone().map_choices(|label| Choice { token: String::new(), label });
      instance_question(q, String::new(), kind)
    })
    .collect();
  FormInstance { questions }
}

fn instance_question(q: &CanonicalQuestion, token: String, kind: QuestionKind<Choice>) -> InstanceQuestion {
  InstanceQuestion {
    token,
    text: q.text.clone(),
    priority: q.priority,
    validator_words: validator_words(&q.kind),
    kind,
    response: Response::Missing,
    errors: Vec::new(),
  }
}

/// Human-readable descriptions of a question's validators, in min, max, required order.
pub fn validator_words<C>(kind: &QuestionKind<C>) -> Vec<String> {
  let mut words = Vec::new();
  let (min, max) = kind.bounds();
  match kind {
    QuestionKind::Text { .. } | QuestionKind::Textarea { .. } => {
      if let Some(n) = min { words.push(format!("Must be longer than {n} characters")); }
      if let Some(n) = max { words.push(format!("Must be shorter than {n} characters")); }
    }
    QuestionKind::Number { .. } => {
      if let Some(n) = min { words.push(format!("Number must be bigger than {n}.")); }
      if let Some(n) = max { words.push(format!("Number must be smaller than {n}.")); }
    }
    QuestionKind::Checkbox { .. } => {
      if let Some(n) = min { words.push(format!("At least {n} need to be selected")); }
      if let Some(n) = max { words.push(format!("No more than {n} may be selected")); }
    }
    QuestionKind::Radio { .. } | QuestionKind::Dropdown { .. } => {}
  }
  if kind.required() {
    words.push("Requires a response.".to_string());
  }
  words
}
