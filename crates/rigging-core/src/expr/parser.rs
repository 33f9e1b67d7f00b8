//! Recursive-descent parser producing [`Expr`] trees

use super::lexer::{Spanned, Token, tokenize};
use super::{BinaryOp, Expr, Filter, PathSegment, UnaryOp, VarPath};
use crate::error::{CoreError, Result};
use crate::value::Value;

pub(crate) fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(CoreError::parse(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.peek_spanned() {
        return Err(CoreError::parse(
            extra.offset,
            format!("unexpected token {:?}", extra.token),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_spanned(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |s| s.offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        token
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let offset = self.offset();
        match self.advance() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(CoreError::parse(
                offset,
                format!("expected {expected:?}, found {t:?}"),
            )),
            None => Err(CoreError::parse(
                offset,
                format!("expected {expected:?}, found end of input"),
            )),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.is_keyword("or") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while self.is_keyword("and") {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.is_keyword("not") {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let lhs = self.parse_concat()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::NotEq,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Ident(w)) if w == "in" => BinaryOp::In,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_concat()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_sum()?;
        while matches!(self.peek(), Some(Token::Tilde)) {
            self.advance();
            let rhs = self.parse_sum()?;
            lhs = Expr::Binary(BinaryOp::Concat, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.advance();
            let offset = self.offset();
            let name = match self.advance() {
                Some(Token::Ident(name)) => name,
                _ => return Err(CoreError::parse(offset, "expected filter name after '|'")),
            };
            let filter = match name.as_str() {
                "default" => {
                    self.expect(Token::LParen)?;
                    let fallback = self.parse_or()?;
                    self.expect(Token::RParen)?;
                    Filter::Default(Box::new(fallback))
                }
                "lower" => Filter::Lower,
                "upper" => Filter::Upper,
                "trim" => Filter::Trim,
                "length" => Filter::Length,
                "string" => Filter::String,
                "int" => Filter::Int,
                "bool" => Filter::Bool,
                other => {
                    return Err(CoreError::parse(offset, format!("unknown filter '{other}'")));
                }
            };
            expr = Expr::Filter(Box::new(expr), filter);
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::from(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "and" | "or" | "not" | "in" => Err(CoreError::parse(
                    offset,
                    format!("unexpected keyword '{word}'"),
                )),
                _ => self.parse_path(word),
            },
            Some(t) => Err(CoreError::parse(offset, format!("unexpected token {t:?}"))),
            None => Err(CoreError::parse(offset, "unexpected end of input")),
        }
    }

    fn parse_path(&mut self, root: String) -> Result<Expr> {
        let mut segments = vec![PathSegment::Key(root)];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let offset = self.offset();
                    match self.advance() {
                        Some(Token::Ident(key)) => segments.push(PathSegment::Key(key)),
                        _ => return Err(CoreError::parse(offset, "expected name after '.'")),
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let offset = self.offset();
                    match self.advance() {
                        Some(Token::Int(n)) if n >= 0 => {
                            segments.push(PathSegment::Index(n as usize));
                        }
                        Some(Token::Str(key)) => segments.push(PathSegment::Key(key)),
                        _ => {
                            return Err(CoreError::parse(
                                offset,
                                "expected non-negative index or quoted key",
                            ));
                        }
                    }
                    self.expect(Token::RBracket)?;
                }
                _ => break,
            }
        }
        Ok(Expr::Var(VarPath { segments }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn var(path: &str) -> Expr {
        Expr::Var(VarPath {
            segments: path
                .split('.')
                .map(|s| PathSegment::Key(s.to_string()))
                .collect(),
        })
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3 == 7 and not false").unwrap();
        let expected = Expr::Binary(
            BinaryOp::And,
            Box::new(Expr::Binary(
                BinaryOp::Eq,
                Box::new(Expr::Binary(
                    BinaryOp::Add,
                    Box::new(Expr::Literal(json!(1))),
                    Box::new(Expr::Binary(
                        BinaryOp::Mul,
                        Box::new(Expr::Literal(json!(2))),
                        Box::new(Expr::Literal(json!(3))),
                    )),
                )),
                Box::new(Expr::Literal(json!(7))),
            )),
            Box::new(Expr::Unary(
                UnaryOp::Not,
                Box::new(Expr::Literal(json!(false))),
            )),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_path_with_index_and_quoted_key() {
        let expr = parse("local_file[\"web-1\"].path[0]").unwrap();
        assert_eq!(
            expr,
            Expr::Var(VarPath {
                segments: vec![
                    PathSegment::Key("local_file".into()),
                    PathSegment::Key("web-1".into()),
                    PathSegment::Key("path".into()),
                    PathSegment::Index(0),
                ]
            })
        );
        assert_eq!(
            expr.as_path().unwrap().to_string(),
            "local_file[\"web-1\"].path[0]"
        );
    }

    #[test]
    fn test_filters_bind_tighter_than_binary_operators() {
        let expr = parse("port | default(22) + 1").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Filter(
                    Box::new(var("port")),
                    Filter::Default(Box::new(Expr::Literal(json!(22))))
                )),
                Box::new(Expr::Literal(json!(1))),
            )
        );
    }

    #[test]
    fn test_references_in_source_order() {
        let expr = parse("a.x ~ b.y | default(c)").unwrap();
        let refs: Vec<String> = expr.references().iter().map(|p| p.to_string()).collect();
        assert_eq!(refs, vec!["a.x", "b.y", "c"]);
    }

    #[test]
    fn test_required_references_skip_defaulted_inputs() {
        let required = |source: &str| -> Vec<String> {
            parse(source)
                .unwrap()
                .required_references()
                .iter()
                .map(|p| p.to_string())
                .collect()
        };
        assert_eq!(required("a.x | default(c | lower)"), vec!["c"]);
        assert!(required("a.x | default('n') | upper").is_empty());
        assert_eq!(required("(a.x | default(1)) + b.y"), vec!["b.y"]);
    }

    #[test]
    fn test_unknown_filter_is_parse_error() {
        assert!(matches!(
            parse("name | shout"),
            Err(CoreError::Parse { .. })
        ));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(parse("a b").is_err());
        assert!(parse("").is_err());
        assert!(parse("(1 + 2").is_err());
    }
}
