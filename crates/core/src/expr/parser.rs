//! Recursive-descent parser producing the expression AST.
//!
//! Precedence, loosest first: `or`, `and`, comparison, `+`/`-`,
//! `*`/`/`/`%`, unary `-`/`not`, primary.

use std::collections::BTreeSet;

use crate::value::Value;

use super::token::{tokenize, Token};

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

/// Allow-listed reduction functions, legal only in aggregate position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl AggFunc {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::Sum),
            "mean" => Some(Self::Mean),
            "count" => Some(Self::Count),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// A parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Aggregate {
        func: AggFunc,
        arg: Box<Expr>,
    },
}

impl Expr {
    /// Parse an expression string. The error is a plain message; callers
    /// wrap it with rule/KPI context into a configuration error.
    pub fn parse(input: &str) -> Result<Self, String> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expression()?;
        if parser.pos < parser.tokens.len() {
            return Err(format!(
                "unexpected trailing input after position {}",
                parser.pos
            ));
        }
        Ok(expr)
    }

    /// Collect every referenced column name (identifiers, including those
    /// inside reductions).
    pub fn column_refs(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Literal(_) => {}
            Self::Column(name) => {
                out.insert(name.clone());
            }
            Self::Unary { expr, .. } => expr.column_refs(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.column_refs(out);
                rhs.column_refs(out);
            }
            Self::Aggregate { arg, .. } => arg.column_refs(out),
        }
    }

    /// Whether any reduction call appears in the tree.
    pub fn has_aggregate(&self) -> bool {
        match self {
            Self::Literal(_) | Self::Column(_) => false,
            Self::Unary { expr, .. } => expr.has_aggregate(),
            Self::Binary { lhs, rhs, .. } => lhs.has_aggregate() || rhs.has_aggregate(),
            Self::Aggregate { .. } => true,
        }
    }

    /// Reject reduction calls: scalar (per-row) position.
    pub fn validate_scalar(&self) -> Result<(), String> {
        if self.has_aggregate() {
            return Err("reduction functions are not allowed in a per-row expression".into());
        }
        Ok(())
    }

    /// Aggregate position: no nested reductions inside a reduction
    /// argument (`sum(sum(x))` is meaningless and rejected).
    pub fn validate_aggregate(&self) -> Result<(), String> {
        match self {
            Self::Literal(_) | Self::Column(_) => Ok(()),
            Self::Unary { expr, .. } => expr.validate_aggregate(),
            Self::Binary { lhs, rhs, .. } => {
                lhs.validate_aggregate()?;
                rhs.validate_aggregate()
            }
            Self::Aggregate { func, arg } => {
                if arg.has_aggregate() {
                    Err(format!(
                        "nested reduction inside {}() is not allowed",
                        func.as_str()
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), String> {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {expected:?} {context}, found {token:?}")),
            None => Err(format!("expected {expected:?} {context}, found end of input")),
        }
    }

    fn expression(&mut self) -> Result<Expr, String> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.comparison()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::NotEq,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.additive()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(self.unary()?),
                })
            }
            Some(Token::Not) => {
                self.advance();
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(self.unary()?),
                })
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Num(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RParen, "to close '('")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    // Call syntax: only allow-listed reductions exist.
                    let func = AggFunc::parse(&name)
                        .ok_or_else(|| format!("unknown function '{name}'"))?;
                    self.advance();
                    let arg = self.expression()?;
                    self.expect(&Token::RParen, &format!("to close {name}()"))?;
                    Ok(Expr::Aggregate {
                        func,
                        arg: Box::new(arg),
                    })
                } else {
                    Ok(Expr::Column(name))
                }
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_precedence() {
        // 1 + 2 * 3 groups the multiplication first.
        let expr = Expr::parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                rhs,
                ..
            } => assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn parses_logical_over_comparison() {
        let expr = Expr::parse("amount > 100 and region == 'west'").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn parses_reduction_call() {
        let expr = Expr::parse("sum(quantity * price)").unwrap();
        assert!(expr.has_aggregate());
    }

    #[test]
    fn rejects_unknown_function() {
        let err = Expr::parse("exec('rm -rf')").unwrap_err();
        assert!(err.contains("unknown function"), "{err}");
    }

    #[test]
    fn rejects_trailing_tokens() {
        assert!(Expr::parse("1 + 2 )").is_err());
    }

    #[test]
    fn rejects_nested_reduction() {
        let expr = Expr::parse("sum(mean(x))").unwrap();
        assert!(expr.validate_aggregate().is_err());
    }

    #[test]
    fn scalar_position_rejects_reduction() {
        let expr = Expr::parse("sum(amount) > 10").unwrap();
        assert!(expr.validate_scalar().is_err());
    }

    #[test]
    fn collects_column_refs() {
        let expr = Expr::parse("a + b * sum(c)").unwrap();
        let mut refs = std::collections::BTreeSet::new();
        expr.column_refs(&mut refs);
        let names: Vec<&str> = refs.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn negative_literal() {
        let expr = Expr::parse("-5").unwrap();
        assert!(matches!(
            expr,
            Expr::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }
}
