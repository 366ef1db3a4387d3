//! Value resolution.
//!
//! A [`ValueProvider`] produces a value from the machine context and the
//! triggering event. Definitions write providers as single-key objects:
//!
//! ```json
//! {"literal": 42}
//! {"context": "order.total"}
//! {"event": "code"}
//! {"expr": "ctx.count + 1"}
//! ```

use crate::context::{lookup_in, Context};
use crate::error::ResolutionError;
use crate::event::Event;
use crate::expr::Expression;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resolves a dynamic or literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueProvider {
    /// Fixed value captured at construction.
    Literal(Value),
    /// Dotted path into the context.
    Context(String),
    /// Dotted path into the triggering event's payload (`""` is the whole payload).
    Event(String),
    /// Evaluated expression.
    #[serde(rename = "expr")]
    Expression(Expression),
}

impl ValueProvider {
    pub fn literal(value: impl Into<Value>) -> Self {
        ValueProvider::Literal(value.into())
    }

    pub fn context(path: impl Into<String>) -> Self {
        ValueProvider::Context(path.into())
    }

    pub fn event(path: impl Into<String>) -> Self {
        ValueProvider::Event(path.into())
    }

    /// Resolves the value. Never mutates the context.
    pub fn resolve(&self, ctx: &Context, event: Option<&Event>) -> Result<Value, ResolutionError> {
        match self {
            ValueProvider::Literal(value) => Ok(value.clone()),
            ValueProvider::Context(path) => ctx.lookup(path).cloned(),
            ValueProvider::Event(path) => {
                let event = event.ok_or_else(|| ResolutionError::NoEvent {
                    path: format!("event.{}", path),
                })?;
                lookup_in(&event.data, path)
                    .cloned()
                    .ok_or_else(|| ResolutionError::MissingPath {
                        path: format!("event.{}", path),
                    })
            }
            ValueProvider::Expression(expr) => expr.evaluate(ctx, event),
        }
    }
}

impl From<Value> for ValueProvider {
    fn from(value: Value) -> Self {
        ValueProvider::Literal(value)
    }
}
