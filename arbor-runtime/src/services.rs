//! Invoked services backed by tokio tasks.
//!
//! A [`ServiceRegistry`] maps `src` names to async functions. The
//! [`TokioRunner`] spawns one task per invocation and aborts it when the
//! invoking state is exited.
//!
//! Built-in services:
//! - `echo`: completes with its input
//! - `delay`: sleeps (`{"ms": n}`, a bare number, or the configured default),
//!   then completes with its input
//! - `fail`: fails with its input, or `{"message": "failed"}` when there is none

use arbor_core::{Completer, InvocationToken, InvokeOutcome, InvokeRequest, InvokeRunner};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Boxed future returned by a service.
pub type ServiceFuture = Pin<Box<dyn Future<Output = InvokeOutcome> + Send>>;

/// An invokable async service.
pub trait Service: Send + Sync {
    fn call(&self, input: Value) -> ServiceFuture;
}

impl<F, Fut> Service for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = InvokeOutcome> + Send + 'static,
{
    fn call(&self, input: Value) -> ServiceFuture {
        Box::pin(self(input))
    }
}

/// Services by name.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<dyn Service>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding `echo`, `delay` and `fail`.
    pub fn with_builtins(default_delay: Duration) -> Self {
        let registry = Self::new();
        registry.register("echo", |input: Value| async move { InvokeOutcome::Done(input) });
        registry.register("delay", move |input: Value| async move {
            let wait = match &input {
                Value::Number(n) => n.as_u64().map(Duration::from_millis),
                Value::Object(map) => {
                    map.get("ms").and_then(Value::as_u64).map(Duration::from_millis)
                }
                _ => None,
            };
            tokio::time::sleep(wait.unwrap_or(default_delay)).await;
            InvokeOutcome::Done(input)
        });
        registry.register("fail", |input: Value| async move {
            if input.is_null() {
                InvokeOutcome::Error(json!({"message": "failed"}))
            } else {
                InvokeOutcome::Error(input)
            }
        });
        registry
    }

    /// Registers or replaces a service.
    pub fn register(&self, name: impl Into<String>, service: impl Service + 'static) {
        self.services.insert(name.into(), Arc::new(service));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).map(|s| s.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Runs invocations as tokio tasks.
#[derive(Clone)]
pub struct TokioRunner {
    registry: Arc<ServiceRegistry>,
    tasks: Arc<DashMap<InvocationToken, JoinHandle<()>>>,
}

impl TokioRunner {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            tasks: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Number of invocations still running.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }
}

impl InvokeRunner for TokioRunner {
    fn start(&self, request: InvokeRequest, completer: Completer) {
        let InvokeRequest {
            token, src, input, ..
        } = request;

        let Some(service) = self.registry.get(&src) else {
            tracing::warn!(token = %token, src = %src, "unknown service");
            completer.fail(token, json!({"message": format!("unknown service '{}'", src)}));
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(token = %token, src = %src, "no tokio runtime, invocation failed");
                completer.fail(token, json!({"message": "no async runtime available"}));
                return;
            }
        };

        // The task waits until its handle is in `tasks`, so its own removal
        // always finds it.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let tasks = self.tasks.clone();
        let task_token = token.clone();
        let future = service.call(input);
        let task = handle.spawn(async move {
            let _ = registered_rx.await;
            let outcome = future.await;
            tasks.remove(&task_token);
            completer.complete(task_token, outcome);
        });

        self.tasks.insert(token, task);
        let _ = registered_tx.send(());
    }

    fn stop(&self, token: &InvocationToken) {
        if let Some((_, task)) = self.tasks.remove(token) {
            tracing::debug!(token = %token, "aborting invocation");
            task.abort();
        }
    }
}
