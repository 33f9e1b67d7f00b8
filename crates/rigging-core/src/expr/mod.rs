//! A small, pure expression language
//!
//! Used for resource attribute references, action parameters and action
//! conditions. The grammar is intentionally closed:
//!
//! ```text
//! expr    := or
//! or      := and ("or" and)*
//! and     := not ("and" not)*
//! not     := "not" not | compare
//! compare := concat (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in") concat)?
//! concat  := sum ("~" sum)*
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | postfix
//! postfix := primary ("|" filter)*
//! primary := literal | path | "(" expr ")"
//! path    := ident ("." ident | "[" (int | string) "]")*
//! filter  := "default" "(" expr ")" | "lower" | "upper" | "trim"
//!          | "length" | "string" | "int" | "bool"
//! ```
//!
//! Evaluation never falls back silently: a path that cannot be resolved is
//! [`CoreError::UndefinedVariable`](crate::CoreError::UndefinedVariable)
//! unless it is wrapped in `| default(...)`.

mod eval;
mod lexer;
mod parser;

use crate::error::Result;
use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub use eval::{LayeredScope, Scope};

/// One step of a variable path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A dotted variable path such as `web.main.address` or `hosts[0]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarPath {
    pub segments: Vec<PathSegment>,
}

impl VarPath {
    /// Name of the root variable.
    pub fn root(&self) -> &str {
        match self.segments.first() {
            Some(PathSegment::Key(k)) => k,
            _ => "",
        }
    }

    /// The key at position `n`, if that segment is a key.
    pub fn key_at(&self, n: usize) -> Option<&str> {
        match self.segments.get(n) {
            Some(PathSegment::Key(k)) => Some(k),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for VarPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if i == 0 => write!(f, "{k}")?,
                PathSegment::Key(k)
                    if k.chars().all(|c| c.is_alphanumeric() || c == '_')
                        && !k.is_empty() =>
                {
                    write!(f, ".{k}")?
                }
                PathSegment::Key(k) => write!(f, "[{k:?}]")?,
                PathSegment::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Default(Box<Expr>),
    Lower,
    Upper,
    Trim,
    Length,
    String,
    Int,
    Bool,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(VarPath),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Filter(Box<Expr>, Filter),
}

impl Expr {
    pub fn parse(source: &str) -> Result<Expr> {
        parser::parse(source)
    }

    /// Every variable path the expression reads, in source order.
    pub fn references(&self) -> Vec<&VarPath> {
        let mut out = Vec::new();
        self.collect_references(&mut out, false);
        out
    }

    /// Paths that must resolve for evaluation to succeed. Inputs of a
    /// `default(...)` filter may be undefined and are left out.
    pub fn required_references(&self) -> Vec<&VarPath> {
        let mut out = Vec::new();
        self.collect_references(&mut out, true);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a VarPath>, required_only: bool) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(path) => out.push(path),
            Expr::Unary(_, inner) => inner.collect_references(out, required_only),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_references(out, required_only);
                rhs.collect_references(out, required_only);
            }
            Expr::Filter(input, Filter::Default(fallback)) => {
                if !required_only {
                    input.collect_references(out, required_only);
                }
                fallback.collect_references(out, required_only);
            }
            Expr::Filter(input, _) => input.collect_references(out, required_only),
        }
    }

    /// The path when the whole expression is a single variable lookup.
    pub fn as_path(&self) -> Option<&VarPath> {
        match self {
            Expr::Var(path) => Some(path),
            _ => None,
        }
    }
}

/// An expression together with its source text.
///
/// Serializes as the source string, so documents can carry conditions such
/// as `when: "os_family == 'debian'"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    expr: Expr,
}

impl Expression {
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let expr = Expr::parse(&source)?;
        Ok(Self { source, expr })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(&self, scope: &dyn Scope) -> Result<Value> {
        eval::evaluate(&self.expr, scope)
    }

    /// Evaluate and reduce to a boolean with [`is_truthy`](crate::value::is_truthy).
    pub fn evaluate_bool(&self, scope: &dyn Scope) -> Result<bool> {
        Ok(crate::value::is_truthy(&self.evaluate(scope)?))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Expression::parse(source).map_err(serde::de::Error::custom)
    }
}

/// Evaluate a parsed expression against a scope.
pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Value> {
    eval::evaluate(expr, scope)
}
