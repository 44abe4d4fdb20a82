//! Abstract syntax tree for rules and formulas.

use std::collections::BTreeSet;
use std::fmt;

/// A parsed expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    FieldRef(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    FloorDiv,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Ge => ">=",
            BinaryOp::Le => "<=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Pow => "**",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Ge | BinaryOp::Le
        )
    }

    /// Binding strength, higher binds tighter. Used for printing.
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Gt
            | BinaryOp::Lt
            | BinaryOp::Ge
            | BinaryOp::Le => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::FloorDiv => 6,
            BinaryOp::Pow => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Count,
    Max,
    Mean,
    Sum,
    Sqrt,
    Days,
    Today,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(Function::Count),
            "max" => Some(Function::Max),
            "mean" => Some(Function::Mean),
            "sum" => Some(Function::Sum),
            "sqrt" => Some(Function::Sqrt),
            "days" => Some(Function::Days),
            "today" => Some(Function::Today),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Count => "count",
            Function::Max => "max",
            Function::Mean => "mean",
            Function::Sum => "sum",
            Function::Sqrt => "sqrt",
            Function::Days => "days",
            Function::Today => "today",
        }
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Function::Today => (0, 0),
            Function::Days => (1, 2),
            _ => (1, 1),
        }
    }

    /// Aggregates operate over a multi-valued field.
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            Function::Count | Function::Max | Function::Mean | Function::Sum
        )
    }
}

impl Expr {
    /// Every field name referenced anywhere in the expression.
    pub fn field_refs(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::FieldRef(name) => {
                out.insert(name.as_str());
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_fields(out);
                rhs.collect_fields(out);
            }
            Expr::Unary { operand, .. } => operand.collect_fields(out),
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_fields(out);
                }
            }
        }
    }

    /// Whether any aggregate function appears in the expression.
    pub fn uses_aggregates(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::FieldRef(_) => false,
            Expr::Binary { lhs, rhs, .. } => lhs.uses_aggregates() || rhs.uses_aggregates(),
            Expr::Unary { operand, .. } => operand.uses_aggregates(),
            Expr::Call { function, args } => {
                function.is_aggregate() || args.iter().any(Expr::uses_aggregates)
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary {
                op: UnaryOp::Not, ..
            } => 3,
            Expr::Unary {
                op: UnaryOp::Neg, ..
            } => 7,
            _ => 9,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, parent: u8, strict: bool) -> fmt::Result {
        let mine = self.precedence();
        if mine < parent || (strict && mine == parent) {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Text(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Literal::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Prints canonical source that parses back to an equal tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::FieldRef(name) => write!(f, "{{{name}}}"),
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                // `**` groups to the right, comparisons do not chain
                let (left_strict, right_strict) = if *op == BinaryOp::Pow {
                    (true, false)
                } else if op.is_comparison() {
                    (true, true)
                } else {
                    (false, true)
                };
                lhs.fmt_child(f, prec, left_strict)?;
                write!(f, " {} ", op.symbol())?;
                rhs.fmt_child(f, prec, right_strict)
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    write!(f, "not ")?;
                    operand.fmt_child(f, 3, false)
                }
                UnaryOp::Neg => {
                    write!(f, "-")?;
                    operand.fmt_child(f, 7, false)
                }
            },
            Expr::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}
