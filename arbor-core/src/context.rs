//! Machine context: the mutable data bag owned by one running instance.

use crate::error::{CoreError, ResolutionError};
use serde_json::{Map, Value};

/// Key/value data owned by a single interpreter.
///
/// Only actions mutate a running machine's context; guards and value
/// providers receive a shared reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    data: Map<String, Value>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context from a JSON object. `null` yields an empty context.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(data) => Ok(Self { data }),
            Value::Null => Ok(Self::new()),
            other => Err(CoreError::invalid(format!(
                "context must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Creates a context from `defaults` with `overrides` merged on top.
    pub fn merged(defaults: &Value, overrides: Value) -> Result<Self, CoreError> {
        let mut ctx = Self::from_value(defaults.clone())?;
        let overrides = Self::from_value(overrides)?;
        for (k, v) in overrides.data {
            ctx.data.insert(k, v);
        }
        Ok(ctx)
    }

    /// Returns the value stored under a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Looks up a dotted path such as `order.customer.id`.
    pub fn lookup(&self, path: &str) -> Result<&Value, ResolutionError> {
        let mut parts = path.split('.');
        let first = parts.next().unwrap_or_default();
        let mut current = self.data.get(first).ok_or_else(|| missing(path))?;
        for part in parts {
            current = step(current, part).ok_or_else(|| missing(path))?;
        }
        Ok(current)
    }

    /// Stores a value under a top-level key, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    /// Stores a value under a dotted path, creating intermediate objects.
    ///
    /// Fails if an intermediate segment exists but is not an object.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<(), ResolutionError> {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| missing(path))?;

        let mut current = &mut self.data;
        for segment in parents {
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match slot {
                Value::Object(map) => map,
                other => {
                    return Err(ResolutionError::TypeMismatch {
                        at: path.to_string(),
                        expected: "object",
                        found: type_name(other),
                    })
                }
            };
        }
        current.insert(last.to_string(), value);
        Ok(())
    }

    /// Removes a top-level key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a read-only copy of the whole context as a JSON object.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Walks a dotted path inside an arbitrary JSON value (`""` is the value itself).
pub(crate) fn lookup_in<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |value, segment| step(value, segment))
}

fn missing(path: &str) -> ResolutionError {
    ResolutionError::MissingPath {
        path: path.to_string(),
    }
}

/// Returns a short name for the JSON type of a value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
