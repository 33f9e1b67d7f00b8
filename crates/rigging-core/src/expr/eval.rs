//! Expression evaluation

use super::{BinaryOp, Expr, Filter, PathSegment, UnaryOp, VarPath};
use crate::error::{CoreError, Result};
use crate::value::{Value, ValueMap, is_truthy, to_display, type_name, values_equal};
use std::cmp::Ordering;

/// Variable lookup used during evaluation.
pub trait Scope {
    /// Resolve a root variable by name.
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Scope for ValueMap {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Scope for serde_json::Map<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Stack of maps searched front to back; the first hit wins.
#[derive(Default)]
pub struct LayeredScope<'a> {
    layers: Vec<&'a ValueMap>,
}

impl<'a> LayeredScope<'a> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Add a layer with lower precedence than the ones already present.
    pub fn with(mut self, layer: &'a ValueMap) -> Self {
        self.layers.push(layer);
        self
    }
}

impl Scope for LayeredScope<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.layers.iter().find_map(|layer| layer.get(name))
    }
}

pub(crate) fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(path) => resolve_path(path, scope).cloned(),
        Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, scope)?))),
        Expr::Unary(UnaryOp::Neg, inner) => match number(&evaluate(inner, scope)?, "-")? {
            Num::Int(i) => i
                .checked_neg()
                .map(Value::from)
                .ok_or_else(|| CoreError::type_error("integer overflow")),
            Num::Float(f) => Ok(float_value(-f)),
        },
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !is_truthy(&evaluate(lhs, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&evaluate(rhs, scope)?)))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if is_truthy(&evaluate(lhs, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&evaluate(rhs, scope)?)))
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = evaluate(lhs, scope)?;
            let b = evaluate(rhs, scope)?;
            binary(*op, &a, &b)
        }
        Expr::Filter(input, Filter::Default(fallback)) => match evaluate(input, scope) {
            Ok(Value::Null) | Err(CoreError::UndefinedVariable(_)) => evaluate(fallback, scope),
            other => other,
        },
        Expr::Filter(input, filter) => apply_filter(filter, evaluate(input, scope)?),
    }
}

/// Walk a variable path through the scope.
pub(crate) fn resolve_path<'s>(path: &VarPath, scope: &'s dyn Scope) -> Result<&'s Value> {
    let undefined = || CoreError::UndefinedVariable(path.to_string());
    let mut current = scope.lookup(path.root()).ok_or_else(undefined)?;
    for segment in path.segments.iter().skip(1) {
        current = match (segment, current) {
            (PathSegment::Key(k), Value::Object(map)) => map.get(k),
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i),
            _ => None,
        }
        .ok_or_else(undefined)?;
    }
    Ok(current)
}

enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(&self) -> f64 {
        match self {
            Num::Int(i) => *i as f64,
            Num::Float(f) => *f,
        }
    }
}

fn number(value: &Value, op: &str) -> Result<Num> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Num::Int(i)),
            None => n
                .as_f64()
                .map(Num::Float)
                .ok_or_else(|| CoreError::type_error(format!("'{op}' on non-finite number"))),
        },
        other => Err(CoreError::type_error(format!(
            "'{op}' expects numbers, got {}",
            type_name(other)
        ))),
    }
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn binary(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(a, b))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(a, b))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(a, b)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In => contains(b, a).map(Value::Bool),
        BinaryOp::Concat => Ok(Value::String(format!("{}{}", to_display(a), to_display(b)))),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, a, b)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators handled by caller"),
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (number(a, "<")?.as_f64(), number(b, "<")?.as_f64());
            x.partial_cmp(&y)
                .ok_or_else(|| CoreError::type_error("cannot compare NaN"))
        }
        _ => Err(CoreError::type_error(format!(
            "cannot order {} and {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        Value::String(s) => Ok(s.contains(&to_display(needle))),
        Value::Object(map) => Ok(map.contains_key(&to_display(needle))),
        other => Err(CoreError::type_error(format!(
            "'in' expects array, string or object, got {}",
            type_name(other)
        ))),
    }
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        _ => "%",
    };
    let (x, y) = (number(a, symbol)?, number(b, symbol)?);

    if let (Num::Int(i), Num::Int(j)) = (&x, &y) {
        let (i, j) = (*i, *j);
        let result = match op {
            BinaryOp::Add => i.checked_add(j),
            BinaryOp::Sub => i.checked_sub(j),
            BinaryOp::Mul => i.checked_mul(j),
            BinaryOp::Div | BinaryOp::Rem if j == 0 => return Err(CoreError::DivisionByZero),
            BinaryOp::Div if i.checked_rem(j).is_some_and(|r| r != 0) => {
                return Ok(float_value(i as f64 / j as f64));
            }
            BinaryOp::Div => i.checked_div(j),
            _ => i.checked_rem(j),
        };
        return result
            .map(Value::from)
            .ok_or_else(|| CoreError::type_error("integer overflow"));
    }

    let (x, y) = (x.as_f64(), y.as_f64());
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::Rem if y == 0.0 => return Err(CoreError::DivisionByZero),
        BinaryOp::Div => x / y,
        _ => x % y,
    };
    Ok(float_value(result))
}

fn apply_filter(filter: &Filter, value: Value) -> Result<Value> {
    match filter {
        Filter::Default(_) => Ok(value),
        Filter::Lower => Ok(Value::String(to_display(&value).to_lowercase())),
        Filter::Upper => Ok(Value::String(to_display(&value).to_uppercase())),
        Filter::Trim => Ok(Value::String(to_display(&value).trim().to_string())),
        Filter::String => Ok(Value::String(to_display(&value))),
        Filter::Bool => match &value {
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "off" | "0" | "" => Ok(Value::Bool(false)),
                other => Err(CoreError::type_error(format!("cannot convert '{other}' to bool"))),
            },
            other => Ok(Value::Bool(is_truthy(other))),
        },
        Filter::Length => match &value {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            other => Err(CoreError::type_error(format!(
                "'length' expects string, array or object, got {}",
                type_name(other)
            ))),
        },
        Filter::Int => match &value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::from(i)),
                None => Ok(Value::from(n.as_f64().unwrap_or_default().trunc() as i64)),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| CoreError::type_error(format!("cannot convert '{s}' to int"))),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            other => Err(CoreError::type_error(format!(
                "cannot convert {} to int",
                type_name(other)
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::Expression;
    use crate::value::ValueMap;
    use crate::{CoreError, LayeredScope};
    use serde_json::json;

    fn scope() -> ValueMap {
        let mut vars = ValueMap::new();
        vars.insert("os".into(), json!("Debian"));
        vars.insert("port".into(), json!(8080));
        vars.insert("ratio".into(), json!(0.5));
        vars.insert("pkgs".into(), json!(["nginx", "curl"]));
        vars.insert(
            "vpc".into(),
            json!({"main": {"id": "vpc-1", "cidr": "10.0.0.0/16"}}),
        );
        vars
    }

    fn eval(source: &str) -> crate::Result<serde_json::Value> {
        Expression::parse(source).unwrap().evaluate(&scope())
    }

    #[test]
    fn test_lookup_and_concat() {
        assert_eq!(eval("vpc.main.id ~ '/subnet'").unwrap(), json!("vpc-1/subnet"));
        assert_eq!(eval("pkgs[1]").unwrap(), json!("curl"));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("port + 1").unwrap(), json!(8081));
        assert_eq!(eval("port / 2").unwrap(), json!(4040));
        assert_eq!(eval("7 / 2").unwrap(), json!(3.5));
        assert_eq!(eval("ratio * 4").unwrap(), json!(2.0));
        assert_eq!(eval("-port % 7").unwrap(), json!(-8080 % 7));
        assert_eq!(eval("1 / 0"), Err(CoreError::DivisionByZero));
    }

    #[test]
    fn test_comparison_and_logic() {
        assert_eq!(eval("os | lower == 'debian'").unwrap(), json!(true));
        assert_eq!(eval("'nginx' in pkgs and port >= 80").unwrap(), json!(true));
        assert_eq!(eval("not ('apache' in pkgs)").unwrap(), json!(true));
        assert_eq!(eval("'a' < 'b' or missing").unwrap(), json!(true));
    }

    #[test]
    fn test_undefined_is_error() {
        assert_eq!(
            eval("missing.value"),
            Err(CoreError::UndefinedVariable("missing.value".into()))
        );
        assert_eq!(
            eval("vpc.other.id"),
            Err(CoreError::UndefinedVariable("vpc.other.id".into()))
        );
    }

    #[test]
    fn test_default_filter() {
        assert_eq!(eval("missing | default('x')").unwrap(), json!("x"));
        assert_eq!(eval("os | default('x')").unwrap(), json!("Debian"));
        assert_eq!(eval("null | default(3)").unwrap(), json!(3));
    }

    #[test]
    fn test_conversion_filters() {
        assert_eq!(eval("'42' | int + 1").unwrap(), json!(43));
        assert_eq!(eval("'yes' | bool").unwrap(), json!(true));
        assert_eq!(eval("pkgs | length").unwrap(), json!(2));
        assert_eq!(eval("port | string").unwrap(), json!("8080"));
        assert!(matches!(eval("'abc' | int"), Err(CoreError::Type(_))));
    }

    #[test]
    fn test_type_errors() {
        assert!(matches!(eval("os + 1"), Err(CoreError::Type(_))));
        assert!(matches!(eval("pkgs < 3"), Err(CoreError::Type(_))));
    }

    #[test]
    fn test_layered_scope_precedence() {
        let mut high = ValueMap::new();
        high.insert("port".into(), json!(22));
        let low = scope();
        let layered = LayeredScope::new().with(&high).with(&low);
        let expr = Expression::parse("port ~ ':' ~ os").unwrap();
        assert_eq!(expr.evaluate(&layered).unwrap(), json!("22:Debian"));
    }
}
