//! Events dispatched into a machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Suffix of the event raised when an invocation completes successfully.
pub const DONE_SUFFIX: &str = "done";

/// Suffix of the event raised when an invocation fails.
pub const ERROR_SUFFIX: &str = "error";

/// An immutable named signal with an optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, matched against the keys of a state's `on` map.
    #[serde(alias = "event")]
    pub name: String,

    /// Payload (`null` when absent).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Event {
    /// Creates an event without payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Value::Null,
        }
    }

    /// Creates an event carrying `data`.
    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Event synthesized when invocation `id` completes: `<id>.done`.
    pub fn done(invoke_id: &str, result: Value) -> Self {
        Self::with_data(format!("{}.{}", invoke_id, DONE_SUFFIX), result)
    }

    /// Event synthesized when invocation `id` fails: `<id>.error`.
    pub fn error(invoke_id: &str, error: Value) -> Self {
        Self::with_data(format!("{}.{}", invoke_id, ERROR_SUFFIX), error)
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_null()
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_synthetic_names() {
        assert_eq!(Event::done("fetch", json!(1)).name, "fetch.done");
        assert_eq!(Event::error("fetch", json!("boom")).name, "fetch.error");
    }

    #[test]
    fn test_deserialize_with_alias() {
        let event: Event =
            serde_json::from_value(json!({"event": "GO", "data": {"x": 1}})).unwrap();
        assert_eq!(event.name, "GO");
        assert_eq!(event.data["x"], 1);

        let event: Event = serde_json::from_value(json!({"name": "STOP"})).unwrap();
        assert!(!event.has_data());
    }

    #[test]
    fn test_serialize_skips_null_data() {
        let json = serde_json::to_value(Event::new("GO")).unwrap();
        assert_eq!(json, json!({"name": "GO"}));
    }
}
