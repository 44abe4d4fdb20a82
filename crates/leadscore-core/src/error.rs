//! Error types for expression handling and lead scoring.
//!
//! Expression failures are split the same way operators see them: text that
//! does not parse, values that cannot be combined, and expressions that blow
//! through a resource limit. Engine errors wrap those with the id and raw text
//! of the rule or model that produced them.

use thiserror::Error;

/// Malformed rule or formula text.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("syntax error at position {position}: {message}")]
pub struct SyntaxError {
    /// Byte offset into the source where the problem was detected.
    pub position: usize,
    /// What went wrong.
    pub message: String,
}

impl SyntaxError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Failures raised while evaluating a parsed expression against one lead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// An operator received values it cannot combine.
    #[error("cannot apply '{op}' to {detail}")]
    TypeMismatch { op: &'static str, detail: String },

    /// `/`, `//` or `%` with a zero right-hand side.
    #[error("division by zero")]
    DivisionByZero,

    /// A field with no value was used where a number is required.
    #[error("field '{0}' has no value for this lead")]
    UnknownField(String),

    /// An aggregate function was applied to something that is not a collection.
    #[error("{function}() requires a multi-valued field")]
    AggregateContext { function: &'static str },

    /// `mean`/`max` over an empty collection.
    #[error("{function}() of an empty collection")]
    EmptyCollection { function: &'static str },

    /// A function argument outside its domain (e.g. `sqrt(-1)`).
    #[error("{function}(): {detail}")]
    Domain {
        function: &'static str,
        detail: String,
    },

    /// The operation overflowed to infinity or produced NaN.
    #[error("'{op}' produced a non-finite result")]
    NonFinite { op: &'static str },
}

/// Pathological expressions stopped before they exhaust the stack or the CPU.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimitError {
    #[error(
        "expression nesting exceeds the depth limit of {limit} (each operator in a chain such as `a + b + c` adds a level; raise max_depth for long formulas)"
    )]
    Depth { limit: usize },

    #[error("evaluation exceeded the step limit of {limit}")]
    Steps { limit: usize },

    #[error("exponent {exponent} exceeds the allowed magnitude of {limit}")]
    Exponent { exponent: f64, limit: f64 },
}

/// Any failure of a single parse or evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Evaluation(#[from] EvalError),

    #[error(transparent)]
    ResourceLimit(#[from] LimitError),
}

/// Request-level failures of the scoring pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A scoring-model formula failed; the lead cannot be scored.
    #[error("scoring model '{model_id}' failed on `{expression}`: {source}")]
    Scoring {
        model_id: String,
        expression: String,
        source: ExprError,
    },

    /// The tenant's custom total formula failed.
    #[error("total formula `{expression}` failed: {source}")]
    TotalFormula { expression: String, source: ExprError },

    /// A response that cannot be interpreted for its question.
    #[error("invalid answer for '{field_name}': {message}")]
    InvalidAnswer { field_name: String, message: String },

    /// Questions left unanswered when every answer is required.
    #[error("missing answers for: {}", .0.join(", "))]
    MissingAnswers(Vec<String>),

    /// An answer for a field that no question defines.
    #[error("no question with field name '{0}'")]
    UnknownField(String),
}

/// A tenant configuration rejected by validation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid tenant configuration ({} error(s)): {}", .issues.len(), .issues.join("; "))]
pub struct ConfigError {
    pub issues: Vec<String>,
}
