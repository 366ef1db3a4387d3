//! Invocation contract.
//!
//! A state may declare an `invoke` descriptor. When the state is entered the
//! interpreter hands an [`InvokeRequest`] to its [`InvokeRunner`]; when the
//! state is exited the runner is told to stop. Runners report back through a
//! [`Completer`], which queues a [`Completion`] for the interpreter and wakes
//! whoever is driving it. Completions are turned into `<id>.done` or
//! `<id>.error` events and dispatched like any other event.
//!
//! Every start gets a fresh [`InvocationToken`]. A completion whose token no
//! longer matches the active invocation is stale and is dropped.

use crate::event::Event;
use crate::value::ValueProvider;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// `invoke` block of a state definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvokeDef {
    /// Invocation id. Defaults to the owning state's id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Service name, interpreted by the runner.
    pub src: String,

    /// Input resolved when the invocation starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ValueProvider>,
}

impl InvokeDef {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            id: None,
            src: src.into(),
            input: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<ValueProvider>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Identifies one start of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationToken {
    pub invoke_id: String,
    pub generation: u64,
}

impl fmt::Display for InvocationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.invoke_id, self.generation)
    }
}

/// Everything a runner needs to start an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub token: InvocationToken,
    /// Chart id of the invoking machine.
    pub machine: String,
    pub src: String,
    pub input: Value,
}

/// Result reported by a runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeOutcome {
    Done(Value),
    Error(Value),
}

/// A finished invocation waiting to be processed.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub token: InvocationToken,
    pub outcome: InvokeOutcome,
}

impl Completion {
    /// The event this completion is dispatched as.
    pub fn to_event(&self) -> Event {
        match &self.outcome {
            InvokeOutcome::Done(result) => Event::done(&self.token.invoke_id, result.clone()),
            InvokeOutcome::Error(error) => Event::error(&self.token.invoke_id, error.clone()),
        }
    }
}

/// Handle used by runners to report completions.
///
/// Cheap to clone and safe to use from any thread or task. Reporting after
/// the interpreter is gone is a no-op.
#[derive(Debug, Clone)]
pub struct Completer {
    tx: mpsc::UnboundedSender<Completion>,
    notify: Arc<Notify>,
}

impl Completer {
    /// Queues a completion. Returns false if the interpreter has been dropped.
    pub fn complete(&self, token: InvocationToken, outcome: InvokeOutcome) -> bool {
        let sent = self.tx.send(Completion { token, outcome }).is_ok();
        if sent {
            self.notify.notify_one();
        }
        sent
    }

    pub fn done(&self, token: InvocationToken, result: Value) -> bool {
        self.complete(token, InvokeOutcome::Done(result))
    }

    pub fn fail(&self, token: InvocationToken, error: Value) -> bool {
        self.complete(token, InvokeOutcome::Error(error))
    }
}

/// Creates a completion channel and the signal raised on every completion.
pub(crate) fn completion_channel() -> (
    Completer,
    mpsc::UnboundedReceiver<Completion>,
    Arc<Notify>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let notify = Arc::new(Notify::new());
    let completer = Completer {
        tx,
        notify: notify.clone(),
    };
    (completer, rx, notify)
}

/// Starts and stops invoked services.
pub trait InvokeRunner: Send + Sync {
    /// Starts an invocation. Must not block; results go through `completer`.
    fn start(&self, request: InvokeRequest, completer: Completer);

    /// Stops an invocation. Completions it reports afterwards are discarded.
    fn stop(&self, token: &InvocationToken);
}

/// Runner that starts nothing. Invocations never complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRunner;

impl InvokeRunner for NullRunner {
    fn start(&self, request: InvokeRequest, _completer: Completer) {
        tracing::debug!(
            token = %request.token,
            src = %request.src,
            "no runner configured, invocation ignored"
        );
    }

    fn stop(&self, _token: &InvocationToken) {}
}

/// Runner that records requests and lets the caller complete them by hand.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    started: Mutex<Vec<(InvokeRequest, Completer)>>,
    stopped: Mutex<Vec<InvocationToken>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests received so far, oldest first.
    pub fn started(&self) -> Vec<InvokeRequest> {
        self.started.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn stopped(&self) -> Vec<InvocationToken> {
        self.stopped.lock().clone()
    }

    /// Token of the most recent start of `invoke_id`.
    pub fn latest(&self, invoke_id: &str) -> Option<InvocationToken> {
        self.started
            .lock()
            .iter()
            .rev()
            .find(|(r, _)| r.token.invoke_id == invoke_id)
            .map(|(r, _)| r.token.clone())
    }

    /// Reports `outcome` for the most recent request with `token`, even if it
    /// has been stopped.
    pub fn complete(&self, token: &InvocationToken, outcome: InvokeOutcome) -> bool {
        let completer = self
            .started
            .lock()
            .iter()
            .rev()
            .find(|(r, _)| &r.token == token)
            .map(|(_, c)| c.clone());
        match completer {
            Some(completer) => completer.complete(token.clone(), outcome),
            None => false,
        }
    }
}

impl InvokeRunner for RecordingRunner {
    fn start(&self, request: InvokeRequest, completer: Completer) {
        self.started.lock().push((request, completer));
    }

    fn stop(&self, token: &InvocationToken) {
        self.stopped.lock().push(token.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token(id: &str, generation: u64) -> InvocationToken {
        InvocationToken {
            invoke_id: id.to_string(),
            generation,
        }
    }

    #[test]
    fn test_completion_events() {
        let done = Completion {
            token: token("fetch", 1),
            outcome: InvokeOutcome::Done(json!({"rows": 3})),
        };
        let event = done.to_event();
        assert_eq!(event.name, "fetch.done");
        assert_eq!(event.data, json!({"rows": 3}));

        let failed = Completion {
            token: token("fetch", 2),
            outcome: InvokeOutcome::Error(json!("timeout")),
        };
        assert_eq!(failed.to_event().name, "fetch.error");
    }

    #[test]
    fn test_completer_queues_and_signals() {
        let (completer, mut rx, _notify) = completion_channel();
        assert!(completer.done(token("a", 1), json!(1)));
        assert!(completer.fail(token("a", 2), json!("x")));

        assert_eq!(rx.try_recv().unwrap().token, token("a", 1));
        assert_eq!(rx.try_recv().unwrap().token, token("a", 2));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!completer.done(token("a", 3), json!(null)));
    }

    #[test]
    fn test_recording_runner() {
        let runner = RecordingRunner::new();
        let (completer, mut rx, _notify) = completion_channel();
        runner.start(
            InvokeRequest {
                token: token("load", 1),
                machine: "m".to_string(),
                src: "loader".to_string(),
                input: json!(null),
            },
            completer,
        );

        assert_eq!(runner.latest("load"), Some(token("load", 1)));
        assert!(runner.complete(&token("load", 1), InvokeOutcome::Done(json!(7))));
        assert!(!runner.complete(&token("load", 9), InvokeOutcome::Done(json!(7))));
        assert_eq!(rx.try_recv().unwrap().outcome, InvokeOutcome::Done(json!(7)));

        runner.stop(&token("load", 1));
        assert_eq!(runner.stopped(), vec![token("load", 1)]);
    }

    #[test]
    fn test_invoke_def_serde() {
        let def: InvokeDef =
            serde_json::from_value(json!({"src": "fetch_user", "input": {"context": "user_id"}}))
                .unwrap();
        assert_eq!(def.id, None);
        assert_eq!(def.input, Some(ValueProvider::context("user_id")));

        let bad: Result<InvokeDef, _> = serde_json::from_value(json!({"src": "x", "sorce": 1}));
        assert!(bad.is_err());
    }
}
