//! Argument values and their SQL literal form.
//!
//! Arguments are plain [`serde_json::Value`]s keyed by name. Names may be
//! dotted (`user.address.city`) to reach into nested objects and arrays.

use serde_json::Value;
use std::collections::HashMap;

/// Named argument mapping passed to every rendering operation.
pub type Args = HashMap<String, Value>;

/// Builds an [`Args`] mapping from `name => value` pairs.
///
/// Values go through [`serde_json::json!`], so anything serializable works.
///
/// ```
/// use sqlx_dynamic_sql::args;
///
/// let args = args! { "id" => 42, "names" => vec!["a", "b"] };
/// assert_eq!(args["id"], 42);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::Args::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut args = $crate::Args::new();
        $(
            args.insert(::std::string::String::from($key), $crate::serde_json::json!($value));
        )+
        args
    }};
}

/// Looks up `name` in `args`: exact key first, then a dotted path walk.
pub fn lookup<'a>(args: &'a Args, name: &str) -> Option<&'a Value> {
    if let Some(value) = args.get(name) {
        return Some(value);
    }
    let (head, rest) = name.split_once('.')?;
    lookup_path(args.get(head)?, rest)
}

/// Walks `path` (dot separated keys or array indices) starting at `value`.
///
/// An empty path returns `value` itself.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Absent, null, whitespace-only strings and empty containers are blank.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Wraps `value` in single quotes, doubling any embedded quote.
pub fn safe_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Renders a scalar (or nested container) as a SQL literal.
///
/// Strings are quoted, numbers and booleans are not, nested containers are
/// written as quoted JSON text.
pub fn quote_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => safe_quote(s),
        Value::Array(_) | Value::Object(_) => safe_quote(&value.to_string()),
    }
}

/// Renders a value for inlining into SQL text.
///
/// Top-level arrays expand to a `, ` joined list. With `quote` unset strings
/// are written verbatim, which is only meant for trusted SQL snippets.
pub fn format_literal(value: &Value, quote: bool) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| format_scalar(item, quote))
            .collect::<Vec<_>>()
            .join(", "),
        other => format_scalar(other, quote),
    }
}

fn format_scalar(value: &Value, quote: bool) -> String {
    match value {
        Value::String(s) if !quote => s.clone(),
        Value::Array(_) | Value::Object(_) if !quote => value.to_string(),
        other => quote_literal(other),
    }
}

/// String form used by comparisons and pipes: strings verbatim, others as JSON.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric view of a value; numeric strings count as numbers.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
