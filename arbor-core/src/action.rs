//! Actions executed on entry, exit, and transitions.
//!
//! Actions are written as tagged objects:
//!
//! ```json
//! {"type": "log", "label": "door", "message": {"expr": "ctx.opens"}}
//! {"type": "assign", "key": "opens", "value": {"expr": "ctx.opens + 1"}}
//! {"type": "raise", "event": "CHECK", "data": {"context": "opens"}}
//! ```

use crate::context::Context;
use crate::error::ActionFailure;
use crate::event::Event;
use crate::sink::{LogLevel, LogRecord, LogSink};
use crate::value::ValueProvider;
use serde::{Deserialize, Serialize};

/// What happens to events raised by actions while a dispatch is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaisePolicy {
    /// Queue behind the current event (FIFO).
    #[default]
    Queue,
    /// Fail the raising action.
    Reject,
}

/// Everything an action may touch besides the context.
pub struct ActionScope<'a> {
    /// Chart id, attached to log records.
    pub machine: &'a str,
    pub sink: &'a dyn LogSink,
    /// Events raised during the current step, in order.
    pub raised: &'a mut Vec<Event>,
    pub raise_policy: RaisePolicy,
}

/// A unit of side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Resolve a message and emit it through the log sink.
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default)]
        level: LogLevel,
        message: ValueProvider,
    },

    /// Write a resolved value into a context key (dotted paths allowed).
    Assign { key: String, value: ValueProvider },

    /// Queue an internal event.
    Raise {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ValueProvider>,
    },
}

impl Action {
    pub fn log(message: impl Into<ValueProvider>) -> Self {
        Action::Log {
            label: None,
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    pub fn assign(key: impl Into<String>, value: impl Into<ValueProvider>) -> Self {
        Action::Assign {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn raise(event: impl Into<String>) -> Self {
        Action::Raise {
            event: event.into(),
            data: None,
        }
    }

    /// Short identity used in diagnostics, e.g. `assign(count)`.
    pub fn describe(&self) -> String {
        match self {
            Action::Log { label: Some(label), .. } => format!("log({})", label),
            Action::Log { label: None, .. } => "log".to_string(),
            Action::Assign { key, .. } => format!("assign({})", key),
            Action::Raise { event, .. } => format!("raise({})", event),
        }
    }

    /// Executes the action.
    pub fn apply(
        &self,
        ctx: &mut Context,
        event: Option<&Event>,
        scope: &mut ActionScope<'_>,
    ) -> Result<(), ActionFailure> {
        match self {
            Action::Log {
                label,
                level,
                message,
            } => {
                let message = message.resolve(ctx, event)?;
                scope.sink.log(LogRecord {
                    machine: scope.machine.to_string(),
                    level: *level,
                    label: label.clone(),
                    message,
                });
            }
            Action::Assign { key, value } => {
                let value = value.resolve(ctx, event)?;
                ctx.set_path(key, value)?;
            }
            Action::Raise { event: name, data } => {
                if scope.raise_policy == RaisePolicy::Reject {
                    return Err(ActionFailure::RaiseRejected {
                        event: name.clone(),
                    });
                }
                let raised = match data {
                    Some(provider) => Event::with_data(name.clone(), provider.resolve(ctx, event)?),
                    None => Event::new(name.clone()),
                };
                scope.raised.push(raised);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionError;
    use crate::sink::MemorySink;
    use serde_json::json;

    fn run(
        action: &Action,
        ctx: &mut Context,
        policy: RaisePolicy,
    ) -> (Result<(), ActionFailure>, Vec<Event>, MemorySink) {
        let sink = MemorySink::new();
        let mut raised = Vec::new();
        let mut scope = ActionScope {
            machine: "test",
            sink: &sink,
            raised: &mut raised,
            raise_policy: policy,
        };
        let result = action.apply(ctx, None, &mut scope);
        (result, raised, sink)
    }

    #[test]
    fn test_assign_literal_only_touches_key() {
        let mut ctx = Context::from_value(json!({"y": "keep"})).unwrap();
        let (result, _, _) = run(&Action::assign("x", json!(42)), &mut ctx, RaisePolicy::Queue);

        result.unwrap();
        assert_eq!(ctx.snapshot(), json!({"x": 42, "y": "keep"}));
    }

    #[test]
    fn test_assign_overwrites_and_nests() {
        let mut ctx = Context::from_value(json!({"count": 1})).unwrap();
        let action: Action = serde_json::from_value(json!({
            "type": "assign", "key": "count", "value": {"expr": "ctx.count + 1"}
        }))
        .unwrap();
        run(&action, &mut ctx, RaisePolicy::Queue).0.unwrap();
        assert_eq!(ctx.get("count"), Some(&json!(2)));

        run(&Action::assign("stats.last", json!("ok")), &mut ctx, RaisePolicy::Queue)
            .0
            .unwrap();
        assert_eq!(ctx.lookup("stats.last").unwrap(), &json!("ok"));
    }

    #[test]
    fn test_assign_resolution_failure_leaves_context() {
        let mut ctx = Context::from_value(json!({"a": 1})).unwrap();
        let action = Action::assign("b", ValueProvider::context("missing"));
        let (result, _, _) = run(&action, &mut ctx, RaisePolicy::Queue);

        assert!(matches!(
            result,
            Err(ActionFailure::Resolution(ResolutionError::MissingPath { .. }))
        ));
        assert_eq!(ctx.snapshot(), json!({"a": 1}));
    }

    #[test]
    fn test_log_uses_sink_not_context() {
        let mut ctx = Context::from_value(json!({"name": "ada"})).unwrap();
        let action: Action = serde_json::from_value(json!({
            "type": "log", "label": "greet", "level": "debug", "message": {"context": "name"}
        }))
        .unwrap();
        let (result, _, sink) = run(&action, &mut ctx, RaisePolicy::Queue);

        result.unwrap();
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label.as_deref(), Some("greet"));
        assert_eq!(records[0].level, LogLevel::Debug);
        assert_eq!(records[0].message, json!("ada"));
        assert_eq!(records[0].machine, "test");
        assert_eq!(ctx.snapshot(), json!({"name": "ada"}));
    }

    #[test]
    fn test_raise_respects_policy() {
        let mut ctx = Context::new();
        let action = Action::Raise {
            event: "NEXT".to_string(),
            data: Some(ValueProvider::literal(json!({"n": 1}))),
        };

        let (result, raised, _) = run(&action, &mut ctx, RaisePolicy::Queue);
        result.unwrap();
        assert_eq!(raised, vec![Event::with_data("NEXT", json!({"n": 1}))]);

        let (result, raised, _) = run(&action, &mut ctx, RaisePolicy::Reject);
        assert!(matches!(result, Err(ActionFailure::RaiseRejected { .. })));
        assert!(raised.is_empty());
    }

    #[test]
    fn test_describe() {
        assert_eq!(Action::assign("x", json!(1)).describe(), "assign(x)");
        assert_eq!(Action::raise("GO").describe(), "raise(GO)");
        assert_eq!(Action::log(json!("hi")).describe(), "log");
    }
}
