//! Lenient readers for the JSON argument objects sent by the UI, recipes
//! and the CLI. Form fields arrive as strings as often as as typed values,
//! so numbers, booleans and lists are accepted in either shape.

use rtools_shared::{Result, RtoolsError};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    raw: &'a Value,
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Args<'a> {
    /// Wrap an argument object; `null` is treated as `{}`.
    pub fn new(raw: &'a Value) -> Result<Self> {
        match raw {
            Value::Null => Ok(Self { raw, map: None }),
            Value::Object(map) => Ok(Self {
                raw,
                map: Some(map),
            }),
            other => Err(RtoolsError::validation(format!(
                "args must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn raw(&self) -> &'a Value {
        self.raw
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map?.get(key).filter(|v| !v.is_null())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Trimmed non-empty string (numbers are rendered).
    pub fn str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// String as sent, including the empty string.
    pub fn raw_str(&self, key: &str) -> Option<String> {
        self.get(key)?.as_str().map(String::from)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.bool(key).unwrap_or(default)
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A list of strings: a JSON array, or text split on newlines and on
    /// commas outside `{...}` alternations.
    pub fn list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => split_list(s),
            _ => Vec::new(),
        }
    }

    /// Like [`Args::list`] but only splits text on newlines, for regex terms.
    pub fn lines(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::String(s)) => s
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            _ => self.list(key),
        }
    }

    pub fn object(&self, key: &str) -> Option<&'a Map<String, Value>> {
        self.get(key)?.as_object()
    }
}

/// Split on newlines and top-level commas.
pub fn split_list(text: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => items.push(std::mem::take(&mut current)),
            '\n' | '\r' => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    items.push(current);
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
