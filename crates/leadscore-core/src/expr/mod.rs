//! The rule and formula language.
//!
//! Rules are boolean expressions over `{field}` references, e.g.
//! `{credit_score} > 700 and {employment_years} >= 2`. Formulas use the same
//! grammar and produce numbers.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::{BinaryOp, Expr, Function, Literal, UnaryOp};
pub use eval::{evaluate, evaluate_with_limits, EvalLimits};
pub use parser::{parse, parse_with_depth, DEFAULT_MAX_DEPTH};
pub use value::Value;
