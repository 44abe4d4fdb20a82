//! Tree-walking evaluator.
//!
//! Evaluation borrows both the tree and the context immutably, so one parsed
//! expression can be evaluated concurrently against many leads. Every node
//! visit costs one step; aggregates also pay one step per collection item.

use std::cmp::Ordering;

use crate::context::Context;
use crate::error::{EvalError, ExprError, LimitError};

use super::ast::{BinaryOp, Expr, Function, Literal, UnaryOp};
use super::parser::DEFAULT_MAX_DEPTH;
use super::value::Value;

/// Resource bounds applied to a single evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalLimits {
    /// Maximum node visits (plus aggregate items) per evaluation.
    pub max_steps: usize,
    /// Maximum tree depth, shared with the parser.
    pub max_depth: usize,
    /// Largest exponent magnitude accepted by `**`.
    pub max_exponent: f64,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            max_depth: DEFAULT_MAX_DEPTH,
            max_exponent: 1024.0,
        }
    }
}

/// Evaluate with default limits.
pub fn evaluate(expr: &Expr, ctx: &Context) -> Result<Value, ExprError> {
    evaluate_with_limits(expr, ctx, &EvalLimits::default())
}

pub fn evaluate_with_limits(
    expr: &Expr,
    ctx: &Context,
    limits: &EvalLimits,
) -> Result<Value, ExprError> {
    let mut evaluator = Evaluator {
        ctx,
        limits,
        steps: 0,
        depth: 0,
    };
    evaluator.eval(expr)
}

struct Evaluator<'a> {
    ctx: &'a Context,
    limits: &'a EvalLimits,
    steps: usize,
    depth: usize,
}

impl Evaluator<'_> {
    fn charge(&mut self, steps: usize) -> Result<(), ExprError> {
        self.steps += steps;
        if self.steps > self.limits.max_steps {
            return Err(LimitError::Steps {
                limit: self.limits.max_steps,
            }
            .into());
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        self.charge(1)?;
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(LimitError::Depth {
                limit: self.limits.max_depth,
            }
            .into());
        }
        let result = self.eval_node(expr);
        self.depth -= 1;
        result
    }

    fn eval_node(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Literal(Literal::Number(n)) => Ok(Value::Number(*n)),
            Expr::Literal(Literal::Text(s)) => Ok(Value::Text(s.clone())),
            Expr::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),
            Expr::FieldRef(name) => Ok(self.ctx.lookup(name)),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => Ok(Value::Number(-number_operand("-", &value)?)),
                }
            }
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    let left = self.eval(lhs)?;
                    if !left.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(self.eval(rhs)?.is_truthy()))
                }
                BinaryOp::Or => {
                    let left = self.eval(lhs)?;
                    if left.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(self.eval(rhs)?.is_truthy()))
                }
                op if op.is_comparison() => {
                    let left = self.eval(lhs)?;
                    let right = self.eval(rhs)?;
                    Ok(Value::Bool(compare(*op, &left, &right)))
                }
                op => {
                    let left = self.eval(lhs)?;
                    let right = self.eval(rhs)?;
                    self.arithmetic(*op, &left, &right).map(Value::Number)
                }
            },
            Expr::Call { function, args } => self.call(*function, args),
        }
    }

    fn arithmetic(&self, op: BinaryOp, left: &Value, right: &Value) -> Result<f64, ExprError> {
        let symbol = op.symbol();
        let a = number_operand(symbol, left)?;
        let b = number_operand(symbol, right)?;

        let result = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    return Err(EvalError::DivisionByZero.into());
                }
                a / b
            }
            BinaryOp::FloorDiv => {
                if b == 0.0 {
                    return Err(EvalError::DivisionByZero.into());
                }
                (a / b).floor()
            }
            BinaryOp::Mod => {
                if b == 0.0 {
                    return Err(EvalError::DivisionByZero.into());
                }
                // floored modulo: the result takes the sign of the divisor
                let r = a % b;
                if r != 0.0 && (r < 0.0) != (b < 0.0) {
                    r + b
                } else {
                    r
                }
            }
            BinaryOp::Pow => {
                if b.abs() > self.limits.max_exponent {
                    return Err(LimitError::Exponent {
                        exponent: b,
                        limit: self.limits.max_exponent,
                    }
                    .into());
                }
                a.powf(b)
            }
            _ => unreachable!("logical and comparison operators are handled by eval_node"),
        };

        if !result.is_finite() {
            return Err(EvalError::NonFinite { op: symbol }.into());
        }
        Ok(result)
    }

    fn call(&mut self, function: Function, args: &[Expr]) -> Result<Value, ExprError> {
        if function == Function::Today {
            return Ok(Value::Date(self.ctx.reference_date()));
        }

        let value = self.eval(&args[0])?;
        if value.is_unknown() {
            // a missing input makes the whole call unknown, which compares false
            return Ok(value);
        }

        match function {
            Function::Sqrt => {
                let n = number_operand("sqrt", &value)?;
                if n < 0.0 {
                    return Err(EvalError::Domain {
                        function: "sqrt",
                        detail: format!("negative argument {n}"),
                    }
                    .into());
                }
                Ok(Value::Number(n.sqrt()))
            }
            Function::Days => {
                let from = value.as_date().ok_or_else(|| EvalError::TypeMismatch {
                    op: "days",
                    detail: describe(&value),
                })?;
                let to = match args.get(1) {
                    Some(arg) => {
                        let reference = self.eval(arg)?;
                        if reference.is_unknown() {
                            return Ok(reference);
                        }
                        reference.as_date().ok_or_else(|| EvalError::TypeMismatch {
                            op: "days",
                            detail: describe(&reference),
                        })?
                    }
                    None => self.ctx.reference_date(),
                };
                Ok(Value::Number((to - from).num_days() as f64))
            }
            Function::Count | Function::Sum | Function::Mean | Function::Max => {
                let name = function.name();
                let Value::List(items) = &value else {
                    return Err(EvalError::AggregateContext { function: name }.into());
                };
                self.charge(items.len())?;
                self.aggregate(function, items)
            }
            Function::Today => unreachable!("handled above"),
        }
    }

    fn aggregate(&self, function: Function, items: &[Value]) -> Result<Value, ExprError> {
        let name = function.name();
        let present: Vec<&Value> = items.iter().filter(|v| !v.is_unknown()).collect();

        if function == Function::Count {
            return Ok(Value::Number(present.len() as f64));
        }

        let numbers = present
            .iter()
            .map(|v| number_operand(name, v))
            .collect::<Result<Vec<f64>, _>>()?;

        let result = match function {
            Function::Sum => numbers.iter().sum(),
            Function::Mean => {
                if numbers.is_empty() {
                    return Err(EvalError::EmptyCollection { function: name }.into());
                }
                numbers.iter().sum::<f64>() / numbers.len() as f64
            }
            Function::Max => numbers
                .into_iter()
                .reduce(f64::max)
                .ok_or(EvalError::EmptyCollection { function: name })?,
            _ => unreachable!("only aggregates reach this point"),
        };

        if !result.is_finite() {
            return Err(EvalError::NonFinite { op: name }.into());
        }
        Ok(Value::Number(result))
    }
}

fn describe(value: &Value) -> String {
    format!("{} value '{}'", value.type_name(), value)
}

fn number_operand(op: &'static str, value: &Value) -> Result<f64, ExprError> {
    if let Value::Unknown(name) = value {
        return Err(EvalError::UnknownField(name.clone()).into());
    }
    value.as_number().ok_or_else(|| {
        EvalError::TypeMismatch {
            op,
            detail: describe(value),
        }
        .into()
    })
}

/// Comparison with coercion. Unknown operands make every comparison false.
fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if left.is_unknown() || right.is_unknown() {
        return false;
    }

    let ordering = if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        a.partial_cmp(&b)
    } else if let (Some(a), Some(b)) = (left.as_date(), right.as_date()) {
        Some(a.cmp(&b))
    } else {
        Some(left.to_string().cmp(&right.to_string()))
    };

    let Some(ordering) = ordering else {
        return false;
    };

    match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::Ne => ordering != Ordering::Equal,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Ge => ordering != Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        _ => false,
    }
}
