//! Scoring model engine: answers in, axis scores out.
//!
//! Each scoring model turns one question's answer (or the result of its
//! formula) into raw points via choice points or value/date ranges. The
//! weighted points go to the X axis, the Y axis, or both.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::CompiledExpr;
use crate::context::{build_context, Context, DerivedScores, X_AXIS_SCORE, Y_AXIS_SCORE};
use crate::error::{EngineError, EvalError, ExprError};
use crate::expr::value::{parse_date, parse_number};
use crate::expr::{EvalLimits, Value};
use crate::model::{Answers, Question, QuestionType, Response, ScoringModel};

/// A scoring model with its formula parsed.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub model: ScoringModel,
    pub formula: Option<CompiledExpr>,
}

/// What one scoring model added to the lead's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub model_id: String,
    pub field_name: String,
    /// The answer, or the formula result when the model has a formula.
    pub response: serde_json::Value,
    /// Points before weighting.
    pub points: f64,
    /// `points * weight`, added to each selected axis.
    pub weighted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub x_axis: f64,
    pub y_axis: f64,
    pub total: f64,
    pub contributions: Vec<Contribution>,
}

impl ScoreCard {
    pub fn derived(&self) -> DerivedScores {
        DerivedScores {
            x_axis: self.x_axis,
            y_axis: self.y_axis,
            total: self.total,
        }
    }
}

/// Score one lead. A pure function of its inputs.
///
/// Any formula failure is fatal and names the model and expression. Unanswered
/// questions contribute nothing.
pub fn compute_scores(
    questions: &[Question],
    models: &[CompiledModel],
    answers: &Answers,
    total_formula: Option<&CompiledExpr>,
    limits: &EvalLimits,
    reference_date: NaiveDate,
) -> Result<ScoreCard, EngineError> {
    let by_field: HashMap<&str, &Question> = questions
        .iter()
        .map(|q| (q.field_name.as_str(), q))
        .collect();

    let formula_ctx = models
        .iter()
        .any(|m| m.formula.is_some())
        .then(|| build_context(questions, answers, None, reference_date));

    let mut x_axis = 0.0;
    let mut y_axis = 0.0;
    let mut contributions = Vec::with_capacity(models.len());

    for compiled in models {
        let model = &compiled.model;
        let question = by_field.get(model.field_name.as_str()).copied();

        let (response, points) = match (&compiled.formula, &formula_ctx) {
            (Some(formula), Some(ctx)) => {
                if answers.get(&model.field_name).is_none_or(Response::is_empty) {
                    continue;
                }
                let value = match formula.evaluate(ctx, limits) {
                    Ok(value) => value,
                    Err(ExprError::Evaluation(EvalError::UnknownField(field))) => {
                        debug!(model_id = %model.id, %field, "formula input unanswered, model skipped");
                        continue;
                    }
                    Err(source) => {
                        return Err(EngineError::Scoring {
                            model_id: model.id.clone(),
                            expression: formula.source.clone(),
                            source,
                        })
                    }
                };
                let points = value_points(model, question, &value);
                (value.to_json(), points)
            }
            _ => {
                let Some(response) = answers.get(&model.field_name) else {
                    continue;
                };
                if response.is_empty() {
                    continue;
                }
                let points = response_points(model, question, response)?;
                (serde_json::to_value(response).unwrap_or_default(), points)
            }
        };

        let weighted = points * model.weight;
        if model.x_axis {
            x_axis += weighted;
        }
        if model.y_axis {
            y_axis += weighted;
        }
        debug!(
            model_id = %model.id,
            field = %model.field_name,
            points,
            weighted,
            "scored answer"
        );
        contributions.push(Contribution {
            model_id: model.id.clone(),
            field_name: model.field_name.clone(),
            response,
            points,
            weighted,
        });
    }

    let total = match total_formula {
        Some(formula) => total_from_formula(formula, x_axis, y_axis, limits, reference_date)?,
        None => x_axis + y_axis,
    };

    Ok(ScoreCard {
        x_axis,
        y_axis,
        total,
        contributions,
    })
}

fn total_from_formula(
    formula: &CompiledExpr,
    x_axis: f64,
    y_axis: f64,
    limits: &EvalLimits,
    reference_date: NaiveDate,
) -> Result<f64, EngineError> {
    let mut ctx = Context::new(reference_date);
    ctx.insert(X_AXIS_SCORE, Value::Number(x_axis));
    ctx.insert(Y_AXIS_SCORE, Value::Number(y_axis));

    let fail = |source: ExprError| EngineError::TotalFormula {
        expression: formula.source.clone(),
        source,
    };
    let value = formula.evaluate(&ctx, limits).map_err(fail)?;
    value.as_number().ok_or_else(|| {
        fail(
            EvalError::TypeMismatch {
                op: "total",
                detail: format!("{} value '{}'", value.type_name(), value),
            }
            .into(),
        )
    })
}

fn numeric_points(model: &ScoringModel, n: f64) -> f64 {
    if model.ranges.is_empty() {
        n
    } else {
        model.range_points(n).unwrap_or(0.0)
    }
}

fn date_points(model: &ScoringModel, date: NaiveDate) -> f64 {
    model.date_points(date).unwrap_or(0.0)
}

fn invalid(model: &ScoringModel, message: String) -> EngineError {
    EngineError::InvalidAnswer {
        field_name: model.field_name.clone(),
        message,
    }
}

/// Raw points for a submitted answer.
fn response_points(
    model: &ScoringModel,
    question: Option<&Question>,
    response: &Response,
) -> Result<f64, EngineError> {
    let question_type = question.map(|q| q.question_type);
    let split = question_type == Some(QuestionType::MultipleChoices);
    let mut points = 0.0;

    for item in response.items(split) {
        let raw = item.to_string();
        points += match (question, question_type) {
            (Some(q), Some(QuestionType::Choices | QuestionType::MultipleChoices)) => q
                .find_choice(&raw)
                .map(|c| c.points)
                .ok_or_else(|| invalid(model, format!("'{raw}' is not one of the choices")))?,
            (_, Some(QuestionType::Integer | QuestionType::Slider)) => {
                let n = match item {
                    Response::Number(n) => n,
                    _ => parse_number(&raw)
                        .ok_or_else(|| invalid(model, format!("expected a number, got '{raw}'")))?,
                };
                numeric_points(model, n)
            }
            (_, Some(QuestionType::Date)) => {
                let date = parse_date(&raw).ok_or_else(|| {
                    invalid(model, format!("expected a YYYY-MM-DD date, got '{raw}'"))
                })?;
                date_points(model, date)
            }
            (_, Some(QuestionType::Open)) => 0.0,
            // unconfigured field: score whatever the value looks like
            _ => value_points(model, None, &Value::infer(&raw)),
        };
    }
    Ok(points)
}

/// Raw points for a formula result or an untyped value.
fn value_points(model: &ScoringModel, question: Option<&Question>, value: &Value) -> f64 {
    match value {
        Value::Unknown(_) => 0.0,
        Value::List(items) => items
            .iter()
            .map(|item| value_points(model, question, item))
            .sum(),
        Value::Date(date) => date_points(model, *date),
        Value::Text(text) => {
            if let Some(choice) = question.and_then(|q| q.find_choice(text)) {
                choice.points
            } else if let Some(n) = parse_number(text) {
                numeric_points(model, n)
            } else if let Some(date) = parse_date(text) {
                date_points(model, date)
            } else {
                0.0
            }
        }
        Value::Number(_) | Value::Bool(_) => value
            .as_number()
            .map_or(0.0, |n| numeric_points(model, n)),
    }
}
