//! `${ ... }` interpolation over the expression language
//!
//! A template is plain text with embedded expressions. When the whole string
//! is exactly one `${ expr }` segment the rendered result is the raw value of
//! the expression (so `"${port}"` stays a number); otherwise every segment is
//! stringified and concatenated. `$${` produces a literal `${`.

use crate::error::{CoreError, Result};
use crate::expr::{Expr, Scope, VarPath, evaluate};
use crate::value::{Value, to_display};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let segments = split_segments(&source)?;
        Ok(Self { source, segments })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the template contains no expressions.
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Text(_)))
    }

    /// The expression when the template is exactly one `${ expr }`.
    pub fn single_expr(&self) -> Option<&Expr> {
        match self.segments.as_slice() {
            [Segment::Expr(expr)] => Some(expr),
            _ => None,
        }
    }

    pub fn references(&self) -> Vec<&VarPath> {
        self.exprs().flat_map(Expr::references).collect()
    }

    /// See [`Expr::required_references`]
    pub fn required_references(&self) -> Vec<&VarPath> {
        self.exprs().flat_map(Expr::required_references).collect()
    }

    fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Expr(e) => Some(e),
            Segment::Text(_) => None,
        })
    }

    pub fn render(&self, scope: &dyn Scope) -> Result<Value> {
        if let Some(expr) = self.single_expr() {
            return evaluate(expr, scope);
        }
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(expr) => out.push_str(&to_display(&evaluate(expr, scope)?)),
            }
        }
        Ok(Value::String(out))
    }
}

/// Render every string inside `value` as a template, recursing through
/// arrays and objects. Non-string scalars are returned unchanged.
pub fn render_value(value: &Value, scope: &dyn Scope) -> Result<Value> {
    match value {
        Value::String(s) if s.contains("${") => Template::parse(s.as_str())?.render(scope),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), render_value(v, scope)?)))
            .collect::<Result<serde_json::Map<_, _>>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn split_segments(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < source.len() {
        if source[i..].starts_with("$${") {
            text.push_str("${");
            i += 3;
            continue;
        }
        if source[i..].starts_with("${") {
            let start = i + 2;
            let end = find_close(source, start)?;
            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            let expr = Expr::parse(&source[start..end]).map_err(|e| match e {
                CoreError::Parse { offset, message } => CoreError::Parse {
                    offset: offset + start,
                    message,
                },
                other => other,
            })?;
            segments.push(Segment::Expr(expr));
            i = end + 1;
            continue;
        }
        let ch = source[i..].chars().next().unwrap_or_default();
        text.push(ch);
        i += ch.len_utf8().max(1);
    }

    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

/// Byte offset of the `}` closing an interpolation that starts at `start`,
/// skipping braces inside quoted strings.
fn find_close(source: &str, start: usize) -> Result<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, c) in source[start..].char_indices() {
        match (quote, c) {
            (Some(_), _) if escaped => escaped = false,
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '}') => return Ok(start + offset),
            (None, _) => {}
        }
    }
    Err(CoreError::parse(start - 2, "unterminated '${'"))
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Template {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Template {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Template::parse(source).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueMap;
    use serde_json::json;

    fn vars() -> ValueMap {
        let mut vars = ValueMap::new();
        vars.insert("port".into(), json!(8080));
        vars.insert("host".into(), json!({"name": "web-1"}));
        vars
    }

    #[test]
    fn test_single_expression_keeps_type() {
        let t = Template::parse("${port}").unwrap();
        assert_eq!(t.render(&vars()).unwrap(), json!(8080));
    }

    #[test]
    fn test_mixed_text_is_stringified() {
        let t = Template::parse("http://${host.name}:${port}/").unwrap();
        assert_eq!(t.render(&vars()).unwrap(), json!("http://web-1:8080/"));
        assert_eq!(t.references().len(), 2);
    }

    #[test]
    fn test_escape_and_braces_in_strings() {
        let t = Template::parse("$${literal} ${'}' ~ port}").unwrap();
        assert_eq!(t.render(&vars()).unwrap(), json!("${literal} }8080"));
    }

    #[test]
    fn test_literal_template() {
        let t = Template::parse("plain text").unwrap();
        assert!(t.is_literal());
        assert_eq!(t.render(&vars()).unwrap(), json!("plain text"));
    }

    #[test]
    fn test_unterminated_interpolation() {
        assert!(matches!(
            Template::parse("x ${port"),
            Err(CoreError::Parse { offset: 2, .. })
        ));
    }

    #[test]
    fn test_render_value_recurses() {
        let value = json!({"url": "${host.name}", "list": ["${port}", 1]});
        assert_eq!(
            render_value(&value, &vars()).unwrap(),
            json!({"url": "web-1", "list": [8080, 1]})
        );
    }
}
