//! Checking submitted answers against a user's form instance.
//!
//! Answers are keyed by the tokens that were served in the instance. Every
//! validator runs independently; a question collects all of its errors so the
//! applicant sees them together. Nothing here aborts a submission.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::{FormInstance, InstanceQuestion, QuestionKind, Response};
use crate::error::ValidationError;

/// Raw submitted values, keyed by question token. Checkbox questions may carry
/// several values under one token; the order is the submission order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawAnswers {
    values: HashMap<String, Vec<String>>,
}

impl RawAnswers {
    /// Build from form-encoded `(name, value)` pairs, keeping repeated names.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in pairs {
            values.entry(k.into()).or_default().push(v.into());
        }
        Self { values }
    }

    pub fn first(&self, token: &str) -> Option<&str> {
        self.values.get(token).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn all(&self, token: &str) -> &[String] {
        self.values.get(token).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    One(String),
    Many(Vec<String>),
    Int(i64),
    Float(f64),
    Flag(bool),
}

impl<'de> Deserialize<'de> for RawAnswers {
    /// Accepts `{ "<token>": "value" | ["v1", "v2"] | 42 }`.
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = HashMap::<String, RawValue>::deserialize(deserializer)?;
        let values = map
            .into_iter()
            .map(|(k, v)| {
                let list = match v {
                    RawValue::One(s) => vec![s],
                    RawValue::Many(v) => v,
                    RawValue::Int(i) => vec![i.to_string()],
                    RawValue::Float(f) => vec![f.to_string()],
                    RawValue::Flag(b) => vec![b.to_string()],
                };
                (k, list)
            })
            .collect();
        Ok(Self { values })
    }
}

/// Read answers into `instance` and run its validators.
///
/// Previous responses and errors are replaced. Returns `true` when at least
/// one question has an error; the caller must then re-render the instance
/// instead of recording a submission.
#[instrument(level = "debug", skip_all, fields(questions = instance.questions.len()))]
pub fn validate(instance: &mut FormInstance, answers: &RawAnswers) -> bool {
    let mut has_error = false;
    for question in &mut instance.questions {
        question.errors.clear();
        let (response, mut errors) = extract(question, answers);
        question.response = response;
        errors.extend(check(&question.kind, &question.response));
        if !errors.is_empty() {
            debug!(target: "form", token = %question.token, errors = errors.len(), "Question failed validation");
            has_error = true;
        }
        question.errors = errors.iter().map(ToString::to_string).collect();
    }
    has_error
}

fn extract(question: &InstanceQuestion, answers: &RawAnswers) -> (Response, Vec<ValidationError>) {
    let token = question.token.as_str();
    match &question.kind {
        QuestionKind::Text { .. } | QuestionKind::Textarea { .. } | QuestionKind::Dropdown { .. } => {
            let response = answers
                .first(token)
                .map(|s| Response::Text(s.to_string()))
                .unwrap_or(Response::Missing);
            (response, Vec::new())
        }
        QuestionKind::Radio { .. } => {
            let label = answers
                .first(token)
                .and_then(|picked| question.label_for(picked))
                .unwrap_or_default();
            (Response::Text(label.to_string()), Vec::new())
        }
        QuestionKind::Number { .. } => match answers.first(token).map(str::trim) {
            None | Some("") => (Response::Missing, Vec::new()),
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) => (Response::Number(n), Vec::new()),
                Err(_) => (Response::Missing, vec![ValidationError::NotANumber]),
            },
        },
        QuestionKind::Checkbox { .. } => {
            let labels = answers
                .all(token)
                .iter()
                .filter_map(|picked| question.label_for(picked))
                .map(str::to_string)
                .collect();
            (Response::Choices(labels), Vec::new())
        }
    }
}

fn check<C>(kind: &QuestionKind<C>, response: &Response) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let (min, max) = kind.bounds();

    match kind {
        QuestionKind::Text { .. } | QuestionKind::Textarea { .. } | QuestionKind::Radio { .. } => {
            let len = match response {
                Response::Text(s) => s.chars().count() as i64,
                _ => 0,
            };
            if let Some(min) = min.filter(|&m| len < m) {
                errors.push(ValidationError::TooShort(min));
            }
            if let Some(max) = max.filter(|&m| len > m) {
                errors.push(ValidationError::TooLong(max));
            }
        }
        QuestionKind::Number { .. } => {
            if let Response::Number(n) = *response {
                if let Some(min) = min.filter(|&m| n < m) {
                    errors.push(ValidationError::TooSmall(min));
                }
                if let Some(max) = max.filter(|&m| n > m) {
                    errors.push(ValidationError::TooLarge(max));
                }
            }
        }
        QuestionKind::Checkbox { .. } => {
            let count = match response {
                Response::Choices(v) => v.len() as i64,
                _ => 0,
            };
            if let Some(min) = min.filter(|&m| count < m) {
                errors.push(ValidationError::TooFewChecked(min));
            }
            if let Some(max) = max.filter(|&m| count > m) {
                errors.push(ValidationError::TooManyChecked(max));
            }
        }
        QuestionKind::Dropdown { .. } => {}
    }

    if kind.required() && response.is_empty() {
        errors.push(ValidationError::Required);
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BoundedRules, Choice, RequiredRule};
    use crate::instance::expand;
    use crate::schema::sanitize;
    use serde_json::json;

    fn question(kind: QuestionKind<Choice>) -> InstanceQuestion {
        InstanceQuestion {
            token: "q001".into(),
            text: "Q".into(),
            priority: 1,
            kind,
            validator_words: Vec::new(),
            response: Response::Missing,
            errors: Vec::new(),
        }
    }

    fn choices(labels: &[(&str, &str)]) -> Vec<Choice> {
        labels
            .iter()
            .map(|(t, l)| Choice { token: t.to_string(), label: l.to_string() })
            .collect()
    }

    fn run(q: InstanceQuestion, pairs: &[(&str, &str)]) -> InstanceQuestion {
        let mut instance = FormInstance { questions: vec![q] };
        validate(&mut instance, &RawAnswers::from_pairs(pairs.iter().copied()));
        instance.questions.remove(0)
    }

    #[test]
    fn number_bounds() {
        let schema = sanitize(&json!([{"text": "Age", "type": "number", "validators": {"min": 18, "max": 99}}])).unwrap();
        let mut instance = expand(&schema);
        let token = instance.questions[0].token.clone();

        assert!(validate(&mut instance, &RawAnswers::from_pairs([(token.as_str(), "15")])));
        assert_eq!(
            instance.questions[0].errors,
            vec!["Response was too small. Number must be greater than 18."]
        );

        assert!(!validate(&mut instance, &RawAnswers::from_pairs([(token.as_str(), " 25 ")])));
        assert_eq!(instance.questions[0].response, Response::Number(25));
        assert!(instance.questions[0].errors.is_empty());

        assert!(validate(&mut instance, &RawAnswers::from_pairs([(token.as_str(), "120")])));
        assert_eq!(
            instance.questions[0].errors,
            vec!["Response was too large. Number must be smaller than 99."]
        );
    }

    #[test]
    fn non_numeric_number_is_a_question_error() {
        let q = run(
            question(QuestionKind::Number { validators: BoundedRules::default() }),
            &[("q001", "twelve")],
        );
        assert_eq!(q.errors, vec!["Response must be a whole number."]);
        assert_eq!(q.response, Response::Missing);
    }

    #[test]
    fn required_treats_zero_as_answered() {
        let rules = BoundedRules { required: Some(true), ..Default::default() };
        let q = run(question(QuestionKind::Number { validators: rules.clone() }), &[("q001", "0")]);
        assert!(q.errors.is_empty());
        assert_eq!(q.response, Response::Number(0));

        let q = run(question(QuestionKind::Number { validators: rules.clone() }), &[]);
        assert_eq!(q.errors, vec!["A reply to this question is required."]);

        let q = run(question(QuestionKind::Text { validators: rules.clone() }), &[("q001", "")]);
        assert_eq!(q.errors, vec!["A reply to this question is required."]);

        let q = run(
            question(QuestionKind::Checkbox { choices: choices(&[("c1", "a")]), validators: rules }),
            &[],
        );
        assert_eq!(q.response, Response::Choices(vec![]));
        assert_eq!(q.errors, vec!["A reply to this question is required."]);
    }

    #[test]
    fn required_false_is_not_enforced() {
        let rules = BoundedRules { required: Some(false), ..Default::default() };
        let q = run(question(QuestionKind::Text { validators: rules }), &[]);
        assert!(q.errors.is_empty());
        assert_eq!(q.response, Response::Missing);
    }

    #[test]
    fn errors_accumulate_without_short_circuit() {
        let rules = BoundedRules { required: Some(true), min: Some(3), max: None };
        let q = run(question(QuestionKind::Textarea { validators: rules }), &[("q001", "")]);
        assert_eq!(
            q.errors,
            vec![
                "Response was too short. Minimum length is 3 characters.",
                "A reply to this question is required.",
            ]
        );
    }

    #[test]
    fn text_length_counts_characters() {
        let rules = BoundedRules { required: None, min: None, max: Some(3) };
        let q = run(question(QuestionKind::Text { validators: rules.clone() }), &[("q001", "héé")]);
        assert!(q.errors.is_empty());
        let q = run(question(QuestionKind::Text { validators: rules }), &[("q001", "four")]);
        assert_eq!(q.errors, vec!["Response was too long. Maximum length is 3 characters."]);
    }

    #[test]
    fn radio_resolves_token_to_label() {
        let kind = QuestionKind::Radio {
            choices: choices(&[("r1", "red"), ("r2", "green")]),
            validators: RequiredRule { required: Some(true) },
        };
        let q = run(question(kind.clone()), &[("q001", "r2")]);
        assert_eq!(q.response, Response::Text("green".into()));
        assert!(q.errors.is_empty());

        let q = run(question(kind), &[("q001", "green")]);
        assert_eq!(q.response, Response::Text(String::new()));
        assert_eq!(q.errors, vec!["A reply to this question is required."]);
    }

    #[test]
    fn checkbox_keeps_submission_order_and_drops_unknown() {
        let kind = QuestionKind::Checkbox {
            choices: choices(&[("c1", "a"), ("c2", "b"), ("c3", "c")]),
            validators: BoundedRules { required: None, min: Some(1), max: Some(2) },
        };
        let q = run(question(kind.clone()), &[("q001", "c3"), ("q001", "zzzz"), ("q001", "c1")]);
        assert_eq!(q.response, Response::Choices(vec!["c".into(), "a".into()]));
        assert!(q.errors.is_empty());

        let q = run(question(kind.clone()), &[("q001", "c1"), ("q001", "c2"), ("q001", "c3")]);
        assert_eq!(q.errors, vec!["Response was too long. No more than 2 checkboxes may be checked."]);

        let q = run(question(kind), &[]);
        assert_eq!(q.errors, vec!["Response was too short. At least 1 checkboxes must be checked."]);
    }

    #[test]
    fn validation_is_idempotent() {
        let schema = sanitize(&json!([
            {"text": "Name", "type": "text", "validators": {"min": 5, "required": true}},
            {"text": "Pick", "type": "checkbox", "data": ["x", "y"], "validators": {"min": 2}},
        ]))
        .unwrap();
        let mut instance = expand(&schema);
        let name = instance.questions[0].token.clone();
        let answers = RawAnswers::from_pairs([(name, "Bob".to_string())]);

        assert!(validate(&mut instance, &answers));
        let first = instance.clone();
        assert!(validate(&mut instance, &answers));
        assert_eq!(first, instance);
    }

    #[test]
    fn answers_deserialize_from_json() {
        let answers: RawAnswers =
            serde_json::from_value(json!({"a1b2": "hi", "c3d4": ["x", "y"], "e5f6": 7})).unwrap();
        assert_eq!(answers.first("a1b2"), Some("hi"));
        assert_eq!(answers.all("c3d4"), &["x".to_string(), "y".to_string()]);
        assert_eq!(answers.first("e5f6"), Some("7"));
        assert_eq!(answers.first("nope"), None);
    }
}
