//! Value transformations applied to expression operands (`:name|length`).

use crate::value::display_string;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A named transformation usable in directive conditions.
///
/// ```
/// use serde_json::Value;
/// use sqlx_dynamic_sql::pipe::{Pipe, Pipes};
///
/// struct IsOdd;
///
/// impl Pipe for IsOdd {
///     fn transform(&self, value: &Value) -> Value {
///         Value::Bool(value.as_i64().is_some_and(|n| n % 2 != 0))
///     }
/// }
///
/// let mut pipes = Pipes::default();
/// pipes.register("is_odd", IsOdd);
/// assert!(pipes.get("is_odd").is_some());
/// ```
pub trait Pipe: Send + Sync {
    fn transform(&self, value: &Value) -> Value;
}

impl<F> Pipe for F
where
    F: Fn(&Value) -> Value + Send + Sync,
{
    fn transform(&self, value: &Value) -> Value {
        self(value)
    }
}

/// Registry of pipes; starts with `length`, `upper`, `lower` and `trim`.
#[derive(Clone)]
pub struct Pipes {
    pipes: HashMap<String, Arc<dyn Pipe>>,
}

impl Pipes {
    /// Registers `pipe` under `name`, replacing any previous pipe.
    pub fn register(&mut self, name: impl Into<String>, pipe: impl Pipe + 'static) {
        self.pipes.insert(name.into(), Arc::new(pipe));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Pipe> {
        self.pipes.get(name).map(|pipe| pipe.as_ref())
    }
}

impl Default for Pipes {
    fn default() -> Self {
        let mut pipes = Pipes {
            pipes: HashMap::new(),
        };
        pipes.register("length", length);
        pipes.register("upper", |v: &Value| map_string(v, str::to_uppercase));
        pipes.register("lower", |v: &Value| map_string(v, str::to_lowercase));
        pipes.register("trim", |v: &Value| map_string(v, |s| s.trim().to_owned()));
        pipes
    }
}

impl fmt::Debug for Pipes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.pipes.keys().collect();
        names.sort();
        f.debug_struct("Pipes").field("names", &names).finish()
    }
}

fn length(value: &Value) -> Value {
    let len = match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => display_string(other).chars().count(),
    };
    Value::from(len)
}

fn map_string(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}
