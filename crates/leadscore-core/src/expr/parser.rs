//! Recursive-descent parser for the rule and formula language.
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparisons, `+ -`,
//! `* / % //`, unary sign, `**` (right-associative), atoms. A leading `If`
//! keyword is accepted and ignored so rules can be written the way they read
//! in the product documentation ("If {credit_score} > 700").

use crate::error::{ExprError, LimitError, SyntaxError};

use super::ast::{BinaryOp, Expr, Function, Literal, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};

/// Default bound on the depth of a parsed tree.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Parse `source` with the default depth limit.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    parse_with_depth(source, DEFAULT_MAX_DEPTH)
}

/// Parse `source`, rejecting trees deeper than `max_depth`.
///
/// Depth is the height of the resulting tree, which is what the evaluator
/// and every other tree walk recurse over. Binary operators associate to the
/// left, so a flat chain of `n` operators is `n + 1` levels deep: with the
/// default limit, `{a} + {b} + ...` accepts up to 63 additions. Tenants with
/// longer formulas raise `max_depth` in settings (`LEADSCORE_MAX_DEPTH`),
/// which the evaluator honours through [`EvalLimits`](super::EvalLimits).
pub fn parse_with_depth(source: &str, max_depth: usize) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    if tokens.len() == 1 {
        return Err(SyntaxError::new(0, "empty expression").into());
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        nesting: 0,
        max_depth,
    };
    if parser.peek() == &Token::If {
        parser.advance();
    }
    let node = parser.parse_or()?;

    match parser.peek() {
        Token::Eof => Ok(node.expr),
        Token::RParen => Err(parser.err("unbalanced parentheses: unexpected ')'").into()),
        other => Err(parser
            .err(format!("unexpected {} after expression", other.describe()))
            .into()),
    }
}

/// An expression together with the depth of its tree.
struct Node {
    expr: Expr,
    depth: usize,
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    /// Recursion depth on the way down, checked before the tree exists.
    nesting: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn advance(&mut self) -> &Spanned {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.cur().position, msg)
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.nesting += 1;
        if self.nesting > self.max_depth {
            return Err(LimitError::Depth {
                limit: self.max_depth,
            }
            .into());
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn node(&self, expr: Expr, depth: usize) -> Result<Node, ExprError> {
        if depth > self.max_depth {
            return Err(LimitError::Depth {
                limit: self.max_depth,
            }
            .into());
        }
        Ok(Node { expr, depth })
    }

    fn binary(&self, op: BinaryOp, lhs: Node, rhs: Node) -> Result<Node, ExprError> {
        let depth = 1 + lhs.depth.max(rhs.depth);
        self.node(
            Expr::Binary {
                op,
                lhs: Box::new(lhs.expr),
                rhs: Box::new(rhs.expr),
            },
            depth,
        )
    }

    fn unary(&self, op: UnaryOp, operand: Node) -> Result<Node, ExprError> {
        let depth = 1 + operand.depth;
        self.node(
            Expr::Unary {
                op,
                operand: Box::new(operand.expr),
            },
            depth,
        )
    }

    fn parse_or(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == &Token::Or {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = self.binary(BinaryOp::Or, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_not()?;
        while self.peek() == &Token::And {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = self.binary(BinaryOp::And, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Node, ExprError> {
        if self.peek() == &Token::Not {
            self.advance();
            self.enter()?;
            let operand = self.parse_not()?;
            self.leave();
            return self.unary(UnaryOp::Not, operand);
        }
        self.parse_comparison()
    }

    fn comparison_op(token: &Token) -> Option<BinaryOp> {
        match token {
            Token::Eq => Some(BinaryOp::Eq),
            Token::Ne => Some(BinaryOp::Ne),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Lt => Some(BinaryOp::Lt),
            Token::Ge => Some(BinaryOp::Ge),
            Token::Le => Some(BinaryOp::Le),
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<Node, ExprError> {
        let lhs = self.parse_arith()?;
        let Some(op) = Self::comparison_op(self.peek()) else {
            return Ok(lhs);
        };
        self.advance();
        let rhs = self.parse_arith()?;
        if Self::comparison_op(self.peek()).is_some() {
            return Err(self
                .err("comparisons cannot be chained; combine them with 'and'")
                .into());
        }
        self.binary(op, lhs, rhs)
    }

    fn parse_arith(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = self.binary(op, lhs, rhs)?;
        }
    }

    fn parse_term(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                Token::SlashSlash => BinaryOp::FloorDiv,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = self.binary(op, lhs, rhs)?;
        }
    }

    fn parse_factor(&mut self) -> Result<Node, ExprError> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                self.enter()?;
                let operand = self.parse_factor()?;
                self.leave();
                self.unary(UnaryOp::Neg, operand)
            }
            Token::Plus => {
                self.advance();
                self.enter()?;
                let operand = self.parse_factor()?;
                self.leave();
                Ok(operand)
            }
            _ => self.parse_pow(),
        }
    }

    fn parse_pow(&mut self) -> Result<Node, ExprError> {
        let base = self.parse_atom()?;
        if self.peek() != &Token::StarStar {
            return Ok(base);
        }
        self.advance();
        self.enter()?;
        let exponent = self.parse_factor()?;
        self.leave();
        self.binary(BinaryOp::Pow, base, exponent)
    }

    fn parse_atom(&mut self) -> Result<Node, ExprError> {
        let spanned = self.cur().clone();
        match spanned.token {
            Token::Number(n) => {
                self.advance();
                self.node(Expr::Literal(Literal::Number(n)), 1)
            }
            Token::Str(s) => {
                self.advance();
                self.node(Expr::Literal(Literal::Text(s)), 1)
            }
            Token::True => {
                self.advance();
                self.node(Expr::Literal(Literal::Bool(true)), 1)
            }
            Token::False => {
                self.advance();
                self.node(Expr::Literal(Literal::Bool(false)), 1)
            }
            Token::Field(name) => {
                self.advance();
                self.node(Expr::FieldRef(name), 1)
            }
            Token::Ident(name) => {
                self.advance();
                if self.peek() != &Token::LParen {
                    return Err(SyntaxError::new(
                        spanned.position,
                        format!("unknown identifier '{name}'; field references are written {{{name}}}"),
                    )
                    .into());
                }
                self.parse_call(&name, spanned.position)
            }
            Token::LParen => {
                self.advance();
                self.enter()?;
                let inner = self.parse_or()?;
                self.leave();
                if self.peek() != &Token::RParen {
                    return Err(self
                        .err(format!(
                            "unbalanced parentheses: expected ')', found {}",
                            self.peek().describe()
                        ))
                        .into());
                }
                self.advance();
                Ok(inner)
            }
            Token::RParen => Err(self.err("unbalanced parentheses: unexpected ')'").into()),
            Token::Eof => Err(self.err("unexpected end of expression").into()),
            other => Err(self
                .err(format!("expected a value, found {}", other.describe()))
                .into()),
        }
    }

    fn parse_call(&mut self, name: &str, position: usize) -> Result<Node, ExprError> {
        let function = Function::from_name(name)
            .ok_or_else(|| SyntaxError::new(position, format!("unknown function '{name}'")))?;

        // consume '('
        self.advance();
        self.enter()?;
        let mut args = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                args.push(self.parse_or()?);
                match self.peek() {
                    Token::Comma => {
                        self.advance();
                    }
                    Token::RParen => break,
                    other => {
                        return Err(self
                            .err(format!(
                                "expected ',' or ')' in call to {}(), found {}",
                                function.name(),
                                other.describe()
                            ))
                            .into())
                    }
                }
            }
        }
        self.advance();
        self.leave();

        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(SyntaxError::new(
                position,
                format!(
                    "{}() takes {expected} argument(s), got {}",
                    function.name(),
                    args.len()
                ),
            )
            .into());
        }

        let depth = 1 + args.iter().map(|a| a.depth).max().unwrap_or(0);
        self.node(
            Expr::Call {
                function,
                args: args.into_iter().map(|a| a.expr).collect(),
            },
            depth,
        )
    }
}
