//! Condition expressions for `if`, `else if` and `while`.
//!
//! A condition is written as the command's arguments.  Unquoted literal
//! arguments spelling an operator are operators; every other argument is an
//! operand, referenced by its index so the tree can be stored in the entry's
//! [`Step`](crate::script::compiler::Step) and evaluated against the bound
//! arguments each time the entry runs.
//!
//! Operator precedence (lowest → highest):
//!   `||`  →  `&&`  →  comparison (`== != < <= > >=`)  →  unary `!`  →
//!   operand / `( … )`

use std::cmp::Ordering;

use crate::error::ExecError;
use crate::script::command::ExecContext;
use crate::script::tags::BoundArgument;
use crate::script::value::TagValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Positional argument by index.
    Operand(usize),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Compare(CompareOp, Box<Condition>, Box<Condition>),
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Operand(usize),
    Or,
    And,
    Not,
    Compare(CompareOp),
    LParen,
    RParen,
    Eof,
}

fn classify(index: usize, arg: &BoundArgument) -> Token {
    if arg.quoted {
        return Token::Operand(index);
    }
    let Some(text) = arg.literal_text() else {
        return Token::Operand(index);
    };
    match text.as_str() {
        "||" => Token::Or,
        "&&" => Token::And,
        "!" => Token::Not,
        "==" => Token::Compare(CompareOp::Eq),
        "!=" => Token::Compare(CompareOp::Ne),
        "<" => Token::Compare(CompareOp::Lt),
        "<=" => Token::Compare(CompareOp::Le),
        ">" => Token::Compare(CompareOp::Gt),
        ">=" => Token::Compare(CompareOp::Ge),
        "(" => Token::LParen,
        ")" => Token::RParen,
        _ => Token::Operand(index),
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Token {
        self.tokens.get(self.pos).copied().unwrap_or(Token::Eof)
    }

    fn eat(&mut self, expected: Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Condition, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Condition::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Condition, String> {
        let mut lhs = self.parse_compare()?;
        while self.eat(Token::And) {
            let rhs = self.parse_compare()?;
            lhs = Condition::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> Result<Condition, String> {
        let mut lhs = self.parse_unary()?;
        while let Token::Compare(op) = self.peek() {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Condition::Compare(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Condition, String> {
        if self.eat(Token::Not) {
            return Ok(Condition::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition, String> {
        let tok = self.peek();
        self.pos += 1;
        match tok {
            Token::Operand(i) => Ok(Condition::Operand(i)),
            Token::LParen => {
                let inner = self.parse_or()?;
                if !self.eat(Token::RParen) {
                    return Err("expected ')' in condition".into());
                }
                Ok(inner)
            }
            Token::Eof => Err("incomplete condition".into()),
            other => Err(format!("unexpected {} in condition", describe(other))),
        }
    }
}

fn describe(tok: Token) -> &'static str {
    match tok {
        Token::Or => "'||'",
        Token::And => "'&&'",
        Token::Not => "'!'",
        Token::Compare(_) => "comparison",
        Token::LParen => "'('",
        Token::RParen => "')'",
        Token::Operand(_) => "operand",
        Token::Eof => "end",
    }
}

/// Parse `args[from..]` as a condition.
pub fn parse(args: &[BoundArgument], from: usize) -> Result<Condition, String> {
    let tokens: Vec<Token> = args
        .iter()
        .enumerate()
        .skip(from)
        .map(|(i, a)| classify(i, a))
        .collect();
    if tokens.is_empty() {
        return Err("missing condition".into());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let cond = parser.parse_or()?;
    if parser.peek() != Token::Eof {
        return Err(format!("unexpected {} in condition", describe(parser.peek())));
    }
    Ok(cond)
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

fn truth(value: &TagValue) -> Result<bool, ExecError> {
    value
        .as_bool()
        .ok_or_else(|| ExecError::InvalidArgument(format!("'{value}' is not a boolean")))
}

fn compare(op: CompareOp, l: &TagValue, r: &TagValue) -> bool {
    let ord = match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(l.to_string().cmp(&r.to_string())),
    };
    match (op, ord) {
        (CompareOp::Eq, o) => o == Some(Ordering::Equal),
        (CompareOp::Ne, o) => o != Some(Ordering::Equal),
        (_, None) => false,
        (CompareOp::Lt, Some(o)) => o == Ordering::Less,
        (CompareOp::Le, Some(o)) => o != Ordering::Greater,
        (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
        (CompareOp::Ge, Some(o)) => o != Ordering::Less,
    }
}

impl Condition {
    /// Evaluate to a value.  Operands are evaluated lazily; `&&` and `||`
    /// short-circuit.
    pub fn value(&self, ctx: &mut ExecContext<'_>) -> Result<TagValue, ExecError> {
        match self {
            Condition::Operand(i) => ctx.arg(*i),
            Condition::Not(inner) => Ok(TagValue::Boolean(!inner.holds(ctx)?)),
            Condition::And(l, r) => Ok(TagValue::Boolean(l.holds(ctx)? && r.holds(ctx)?)),
            Condition::Or(l, r) => Ok(TagValue::Boolean(l.holds(ctx)? || r.holds(ctx)?)),
            Condition::Compare(op, l, r) => {
                let l = l.value(ctx)?;
                let r = r.value(ctx)?;
                Ok(TagValue::Boolean(compare(*op, &l, &r)))
            }
        }
    }

    /// Evaluate as a boolean.  A value that is not boolean-like is an error.
    pub fn holds(&self, ctx: &mut ExecContext<'_>) -> Result<bool, ExecError> {
        truth(&self.value(ctx)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
