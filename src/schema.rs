//! Sanitizing moderator-authored question data into a canonical `Schema`.
//!
//! Input is untrusted JSON. Records whose `type` is not one of the known
//! question types are dropped; missing `text`/`type` fields are reported.
//! Validators that do not apply to a question's type are silently dropped.
//!
//! Priorities: questions without an explicit priority are numbered after the
//! *smallest* explicit priority (legacy behavior kept for existing schemas),
//! skipping numbers already in use so every priority stays unique.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::domain::{
  BoundedRules, CanonicalQuestion, QuestionKind, QuestionType, RequiredRule, Schema,
};
use crate::error::SchemaError;

struct Draft {
  text: String,
  priority: Option<i64>,
  kind: QuestionKind<String>,
}

/// Validate and normalize raw question records.
#[instrument(level = "debug", skip(raw))]
pub fn sanitize(raw: &Value) -> Result<Schema, SchemaError> {
  let records = raw.as_array().ok_or(SchemaError::NotAnArray)?;

  let mut drafts = Vec::with_capacity(records.len());
  let mut lowest_explicit: Option<i64> = None;
  let mut explicit: HashMap<i64, usize> = HashMap::new();

  for (index, record) in records.iter().enumerate() {
    let obj = record.as_object().ok_or(SchemaError::NotAnObject { index })?;
    let text = extract_text(obj, index)?;

    let qtype = match obj.get("type") {
      None | Some(Value::Null) => return Err(SchemaError::MissingField { index, field: "type" }),
      Some(Value::String(s)) => QuestionType::parse(s),
      Some(_) => None,
    };
    let Some(qtype) = qtype else {
      debug!(target: "moderation", index, "Dropping question with unknown type");
      continue;
    };

    let priority = extract_priority(obj, index)?;
    if let Some(p) = priority {
      if let Some(&first) = explicit.get(&p) {
        return Err(SchemaError::DuplicatePriority { priority: p, first, second: index });
      }
      explicit.insert(p, index);
      lowest_explicit = Some(lowest_explicit.map_or(p, |m| m.min(p)));
    }

    let choices = if qtype.has_choices() { extract_choices(obj) } else { Vec::new() };
    let validators = obj.get("validators").and_then(Value::as_object);
    let kind = build_kind(qtype, choices, validators);

    drafts.push(Draft { text, priority, kind });
  }

  let start = lowest_explicit.unwrap_or(0);
  let mut next = start.checked_add(1);
  let mut questions = Vec::with_capacity(drafts.len());
  for d in drafts {
    let priority = match d.priority {
      Some(p) => p,
      None => {
        let p = next_free(next, &explicit).ok_or(SchemaError::PriorityOverflow { after: start })?;
        next = p.checked_add(1);
        p
      }
    };
    questions.push(CanonicalQuestion { text: d.text, priority, kind: d.kind });
  }

  // stable: keeps encounter order for equal keys
  questions.sort_by_key(|q| q.priority);

  let schema = Schema::from_questions(questions);
  debug!(target: "moderation", questions = schema.questions.len(), required_tokens = schema.required_tokens, "Schema sanitized");
  Ok(schema)
}

/// First priority at or after `next` that no explicit question holds.
fn next_free(next: Option<i64>, explicit: &HashMap<i64, usize>) -> Option<i64> {
  let mut p = next?;
  while explicit.contains_key(&p) {
    p = p.checked_add(1)?;
  }
  Some(p)
}

fn extract_text(obj: &Map<String, Value>, index: usize) -> Result<String, SchemaError> {
  match obj.get("text") {
    None | Some(Value::Null) => Err(SchemaError::MissingField { index, field: "text" }),
    Some(Value::String(s)) => Ok(s.clone()),
    Some(Value::Number(n)) => Ok(n.to_string()),
    Some(Value::Bool(b)) => Ok(b.to_string()),
    Some(_) => Err(SchemaError::InvalidText { index }),
  }
}

fn extract_priority(obj: &Map<String, Value>, index: usize) -> Result<Option<i64>, SchemaError> {
  let invalid = SchemaError::InvalidPriority { index };
  match obj.get("priority") {
    None | Some(Value::Null) => Ok(None),
    Some(Value::Number(n)) => {
      if let Some(i) = n.as_i64() {
        Ok(Some(i))
      } else {
        match n.as_f64() {
          Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
          _ => Err(invalid),
        }
      }
    }
    Some(Value::String(s)) => s.trim().parse::<i64>().map(Some).map_err(|_| invalid),
    Some(_) => Err(invalid),
  }
}

/// Choices come from `choices`, or `data` in older exports. Every item becomes a string.
fn extract_choices(obj: &Map<String, Value>) -> Vec<String> {
  let list = obj
    .get("choices")
    .or_else(|| obj.get("data"))
    .and_then(Value::as_array);
  let Some(list) = list else { return Vec::new() };
  list
    .iter()
    .map(|item| match item {
      Value::String(s) => s.clone(),
      other => other.to_string(),
    })
    .collect()
}

fn build_kind(
  qtype: QuestionType,
  choices: Vec<String>,
  validators: Option<&Map<String, Value>>,
) -> QuestionKind<String> {
  let required = validators
    .and_then(|v| v.get("required"))
    .and_then(Value::as_bool);

  let bound = |name: &str| -> Option<i64> {
    if !qtype.accepts_bounds() {
      return None;
    }
    match validators.and_then(|v| v.get(name)) {
      // JSON integers only; floats and bools are not bounds
      Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.as_i64(),
      _ => None,
    }
  };

  let bounded = BoundedRules { required, min: bound("min"), max: bound("max") };
  let only_required = RequiredRule { required };

  match qtype {
    QuestionType::Text => QuestionKind::Text { validators: bounded },
    QuestionType::Textarea => QuestionKind::Textarea { validators: bounded },
    QuestionType::Number => QuestionKind::Number { validators: bounded },
    QuestionType::Radio => QuestionKind::Radio { choices, validators: only_required },
    QuestionType::Checkbox => QuestionKind::Checkbox { choices, validators: bounded },
    QuestionType::Dropdown => QuestionKind::Dropdown { choices, validators: only_required },
  }
}
