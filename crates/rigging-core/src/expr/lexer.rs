//! Tokenizer for the expression language

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Dot,
    Comma,
    Pipe,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Tilde,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A token with the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let single = match c {
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            '|' => Some(Token::Pipe),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '~' => Some(Token::Tilde),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(Spanned { token, offset });
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let double = match (c, next) {
            ('=', Some('=')) => Some(Token::EqEq),
            ('!', Some('=')) => Some(Token::NotEq),
            ('<', Some('=')) => Some(Token::Le),
            ('>', Some('=')) => Some(Token::Ge),
            _ => None,
        };
        if let Some(token) = double {
            tokens.push(Spanned { token, offset });
            i += 2;
            continue;
        }

        match c {
            '<' => {
                tokens.push(Spanned {
                    token: Token::Lt,
                    offset,
                });
                i += 1;
            }
            '>' => {
                tokens.push(Spanned {
                    token: Token::Gt,
                    offset,
                });
                i += 1;
            }
            '"' | '\'' => {
                let (value, consumed) = read_string(&chars[i..], c, offset)?;
                tokens.push(Spanned {
                    token: Token::Str(value),
                    offset,
                });
                i += consumed;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut is_float = false;
                while i < chars.len() {
                    let ch = chars[i].1;
                    if ch.is_ascii_digit() || ch == '_' {
                        i += 1;
                    } else if ch == '.'
                        && !is_float
                        && chars.get(i + 1).is_some_and(|(_, d)| d.is_ascii_digit())
                    {
                        is_float = true;
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i]
                    .iter()
                    .map(|(_, ch)| *ch)
                    .filter(|ch| *ch != '_')
                    .collect();
                let token = if is_float {
                    Token::Float(
                        text.parse()
                            .map_err(|_| CoreError::parse(offset, format!("invalid number '{text}'")))?,
                    )
                } else {
                    Token::Int(
                        text.parse()
                            .map_err(|_| CoreError::parse(offset, format!("invalid number '{text}'")))?,
                    )
                };
                tokens.push(Spanned { token, offset });
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().map(|(_, ch)| *ch).collect();
                tokens.push(Spanned {
                    token: Token::Ident(ident),
                    offset,
                });
            }
            other => {
                return Err(CoreError::parse(
                    offset,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }

    Ok(tokens)
}

/// Read a quoted string starting at `chars[0]`. Returns the unescaped value
/// and the number of chars consumed including both quotes.
fn read_string(chars: &[(usize, char)], quote: char, offset: usize) -> Result<(String, usize)> {
    let mut value = String::new();
    let mut i = 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((value, i + 1));
        }
        if c == '\\' {
            let escaped = chars
                .get(i + 1)
                .map(|(_, e)| *e)
                .ok_or_else(|| CoreError::parse(offset, "unterminated escape"))?;
            value.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
            i += 2;
            continue;
        }
        value.push(c);
        i += 1;
    }
    Err(CoreError::parse(offset, "unterminated string literal"))
}
