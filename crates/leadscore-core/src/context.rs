//! Evaluation contexts: the name → value view of one lead.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use tracing::warn;

use crate::expr::value::{parse_date, parse_number};
use crate::expr::Value;
use crate::model::{Answers, Question, QuestionType, Response};

pub const X_AXIS_SCORE: &str = "x_axis_score";
pub const Y_AXIS_SCORE: &str = "y_axis_score";
pub const TOTAL_SCORE: &str = "total_score";

/// Names that always refer to the derived scores.
pub const RESERVED_NAMES: [&str; 3] = [X_AXIS_SCORE, Y_AXIS_SCORE, TOTAL_SCORE];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// The three scores derived from a lead's answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedScores {
    pub x_axis: f64,
    pub y_axis: f64,
    pub total: f64,
}

/// Values visible to an expression, plus the date `today()` resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    values: HashMap<String, Value>,
    reference_date: NaiveDate,
}

impl Context {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self {
            values: HashMap::new(),
            reference_date,
        }
    }

    /// Empty context dated today (UTC).
    pub fn today() -> Self {
        Self::new(Utc::now().date_naive())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// The value bound to `name`, or [`Value::Unknown`] when absent.
    pub fn lookup(&self, name: &str) -> Value {
        self.values
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Unknown(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bind the derived scores, replacing any same-named answer.
    pub fn set_scores(&mut self, scores: &DerivedScores) {
        for (name, score) in [
            (X_AXIS_SCORE, scores.x_axis),
            (Y_AXIS_SCORE, scores.y_axis),
            (TOTAL_SCORE, scores.total),
        ] {
            if self.values.contains_key(name) {
                warn!(field = name, "answer shadowed by the derived score of the same name");
            }
            self.values.insert(name.to_string(), Value::Number(score));
        }
    }
}

/// Build the context for one lead.
///
/// Answers are typed according to their question. Answers to unknown fields
/// are kept as untyped values. Derived scores, when given, are bound last.
pub fn build_context(
    questions: &[Question],
    answers: &Answers,
    scores: Option<&DerivedScores>,
    reference_date: NaiveDate,
) -> Context {
    let by_field: HashMap<&str, &Question> = questions
        .iter()
        .map(|q| (q.field_name.as_str(), q))
        .collect();

    let mut ctx = Context::new(reference_date);
    for answer in answers.iter() {
        let value = match by_field.get(answer.field_name.as_str()) {
            Some(question) => typed_value(question, &answer.response),
            None => untyped_value(&answer.response),
        };
        ctx.insert(answer.field_name.clone(), value);
    }

    if let Some(scores) = scores {
        ctx.set_scores(scores);
    }
    ctx
}

/// Convert a response according to its question's type.
pub fn typed_value(question: &Question, response: &Response) -> Value {
    if question.is_multi_valued() || matches!(response, Response::List(_)) {
        let split = question.question_type == QuestionType::MultipleChoices;
        return Value::List(
            response
                .items(split)
                .iter()
                .map(|item| scalar_value(question, item))
                .collect(),
        );
    }
    scalar_value(question, response)
}

fn scalar_value(question: &Question, response: &Response) -> Value {
    match (question.question_type, response) {
        (_, Response::List(items)) => {
            Value::List(items.iter().map(|i| scalar_value(question, i)).collect())
        }
        (QuestionType::Integer | QuestionType::Slider, Response::Text(s)) => {
            parse_number(s).map_or_else(|| Value::Text(s.clone()), Value::Number)
        }
        (QuestionType::Date, Response::Text(s)) => {
            parse_date(s).map_or_else(|| Value::Text(s.clone()), Value::Date)
        }
        (QuestionType::Choices | QuestionType::MultipleChoices, Response::Text(s)) => {
            match question.find_choice(s) {
                Some(choice) => Value::Text(choice.text.clone()),
                None => Value::Text(s.clone()),
            }
        }
        (QuestionType::Choices | QuestionType::MultipleChoices, Response::Number(n)) => {
            match question.find_choice(&n.to_string()) {
                Some(choice) => Value::Text(choice.text.clone()),
                None => Value::Number(*n),
            }
        }
        (QuestionType::Open, Response::Text(s)) => Value::Text(s.clone()),
        (_, Response::Number(n)) => Value::Number(*n),
    }
}

fn untyped_value(response: &Response) -> Value {
    match response {
        Response::Number(n) => Value::Number(*n),
        Response::Text(s) => Value::infer(s),
        Response::List(items) => Value::List(items.iter().map(untyped_value).collect()),
    }
}
