//! Runtime values and their two renderings: the display form used by the
//! language itself and the JSON form handed to hosts.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::ast::Block;
use super::builtins::Builtin;
use super::scope::ScopeRef;

/// A value produced or consumed by a program.
#[derive(Clone)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Double precision number.
    Num(f64),
    /// UTF-8 string.
    Str(String),
    /// Shared, mutable array.
    Arr(Arc<Mutex<Vec<Value>>>),
    /// Shared, mutable object with insertion-ordered keys.
    Obj(Arc<Mutex<IndexMap<String, Value>>>),
    /// Callable value.
    Fn(Arc<Function>),
}

/// Callable payload of [`Value::Fn`].
pub enum Function {
    /// Function written in the language.
    User(Closure),
    /// Function provided by the engine.
    Builtin(Builtin),
}

/// User function together with the scope it was created in.
pub struct Closure {
    pub(crate) params: Arc<[String]>,
    pub(crate) body: Block,
    pub(crate) scope: ScopeRef,
}

impl Value {
    /// Build an array value.
    pub fn arr(items: Vec<Value>) -> Self {
        Value::Arr(Arc::new(Mutex::new(items)))
    }

    /// Build an object value.
    pub fn obj(entries: IndexMap<String, Value>) -> Self {
        Value::Obj(Arc::new(Mutex::new(entries)))
    }

    /// Build a string value.
    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    pub(crate) fn builtin(builtin: Builtin) -> Self {
        Value::Fn(Arc::new(Function::Builtin(builtin)))
    }

    /// Type name as reported by `Core:type`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Num(_) => "num",
            Value::Str(_) => "str",
            Value::Arr(_) => "arr",
            Value::Obj(_) => "obj",
            Value::Fn(_) => "fn",
        }
    }

    /// Equality used by `==`: primitives by value, containers and functions by identity.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Arr(a), Value::Arr(b)) => Arc::ptr_eq(a, b),
            (Value::Obj(a), Value::Obj(b)) => Arc::ptr_eq(a, b),
            (Value::Fn(a), Value::Fn(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Display form: strings quoted, containers expanded on one line.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        write_repr(self, &mut out, &mut Vec::new());
        out
    }

    /// Text form used by `Core:to_str`: like [`Value::repr`] but strings stay bare.
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(text) => text.clone(),
            other => other.repr(),
        }
    }

    /// JSON form. Integral numbers become JSON integers, non-finite numbers
    /// become `null`, functions become the string `"<function>"`.
    pub fn to_json(&self) -> serde_json::Value {
        to_json(self, &mut Vec::new())
    }

    fn identity(&self) -> Option<usize> {
        match self {
            Value::Arr(items) => Some(Arc::as_ptr(items) as *const () as usize),
            Value::Obj(entries) => Some(Arc::as_ptr(entries) as *const () as usize),
            _ => None,
        }
    }
}

/// Render a number the way the language prints it: `2`, `0.5`, `NaN`, `Infinity`.
pub fn format_num(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if value == 0.0 {
        "0".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

fn write_repr(value: &Value, out: &mut String, seen: &mut Vec<usize>) {
    if let Some(id) = value.identity() {
        if seen.contains(&id) {
            out.push_str("...");
            return;
        }
        seen.push(id);
    }
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Num(num) => out.push_str(&format_num(*num)),
        Value::Str(text) => {
            out.push('"');
            out.push_str(text);
            out.push('"');
        }
        Value::Arr(items) => {
            let items = items.lock().clone();
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(item, out, seen);
            }
            out.push(']');
        }
        Value::Obj(entries) => {
            let entries = entries.lock().clone();
            if entries.is_empty() {
                out.push_str("{}");
            } else {
                out.push_str("{ ");
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    out.push_str(": ");
                    write_repr(item, out, seen);
                }
                out.push_str(" }");
            }
        }
        Value::Fn(function) => match function.as_ref() {
            Function::User(closure) => {
                out.push_str("@(");
                out.push_str(&closure.params.join(", "));
                out.push_str(") { ... }");
            }
            Function::Builtin(builtin) => {
                out.push('@');
                out.push_str(builtin.name());
            }
        },
    }
    if value.identity().is_some() {
        seen.pop();
    }
}

fn to_json(value: &Value, seen: &mut Vec<usize>) -> serde_json::Value {
    use serde_json::Value as Json;

    if let Some(id) = value.identity() {
        if seen.contains(&id) {
            return Json::Null;
        }
        seen.push(id);
    }
    let json = match value {
        Value::Null => Json::Null,
        Value::Bool(flag) => Json::Bool(*flag),
        Value::Num(num) => num_to_json(*num),
        Value::Str(text) => Json::String(text.clone()),
        Value::Arr(items) => {
            let items = items.lock().clone();
            Json::Array(items.iter().map(|item| to_json(item, seen)).collect())
        }
        Value::Obj(entries) => {
            let entries = entries.lock().clone();
            Json::Object(
                entries
                    .iter()
                    .map(|(key, item)| (key.clone(), to_json(item, seen)))
                    .collect(),
            )
        }
        Value::Fn(_) => Json::String("<function>".to_string()),
    };
    if value.identity().is_some() {
        seen.pop();
    }
    json
}

fn num_to_json(num: f64) -> serde_json::Value {
    if num.fract() == 0.0 && num.abs() < 9.0e15 {
        serde_json::Value::from(num as i64)
    } else {
        serde_json::Number::from_f64(num)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<f64> for Value {
    fn from(num: f64) -> Self {
        Value::Num(num)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Str(text.to_string())
    }
}
