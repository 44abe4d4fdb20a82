//! leadscore-core: rule and formula evaluation for lead scoring.
//!
//! This crate parses the rule/formula language, scores leads with
//! tenant-configured scoring models, and selects recommendations whose rules
//! match a lead's answers and derived scores.

pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod expr;
pub mod model;
pub mod recommend;
pub mod report;
pub mod scoring;
pub mod settings;
pub mod statistics;
pub mod tenant;

pub use context::{build_context, Context};
pub use engine::{Engine, EngineOptions, ScoredLead};
pub use error::{ConfigError, EngineError, EvalError, ExprError, LimitError, SyntaxError};
pub use expr::{evaluate, parse, EvalLimits, Expr, Value};
pub use recommend::select_recommendations;
pub use scoring::compute_scores;
