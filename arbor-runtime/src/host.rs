//! Per-instance actors.
//!
//! Every spawned instance owns an [`Interpreter`] inside its own tokio task.
//! Callers talk to it through a bounded command channel and wait for the
//! answer on a oneshot. The task also wakes on the interpreter's completion
//! signal so invoked services can drive the machine between dispatches.

use crate::broadcast::{EventBroadcaster, EventFilter, InstanceEvent, Watcher};
use crate::config::Config;
use crate::error::RuntimeError;
use crate::services::{ServiceRegistry, TokioRunner};
use arbor_core::{
    Chart, Context, CoreError, DispatchOutcome, Event, Interpreter, LogSink, MachineSnapshot,
    MachineStatus, Notification, Predicates, TracingSink,
};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum Command {
    Dispatch {
        event: Event,
        reply: oneshot::Sender<Result<DispatchOutcome, CoreError>>,
    },
    Snapshot {
        reply: oneshot::Sender<MachineSnapshot>,
    },
    Stop {
        reply: oneshot::Sender<Result<MachineSnapshot, CoreError>>,
    },
}

struct InstanceHandle {
    chart: String,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Summary of a live instance.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub chart: String,
}

/// Hosts statechart instances on the tokio runtime.
pub struct MachineHost {
    config: Config,
    charts: DashMap<String, Arc<Chart>>,
    instances: DashMap<String, InstanceHandle>,
    /// Ids whose instance is being started but not yet registered.
    reserved: DashSet<String>,
    broadcaster: Arc<EventBroadcaster>,
    registry: Arc<ServiceRegistry>,
    runner: Arc<TokioRunner>,
    sink: Arc<dyn LogSink>,
    predicates: RwLock<Predicates>,
    shutting_down: AtomicBool,
}

impl MachineHost {
    /// Creates a host with the built-in services registered.
    ///
    /// Zero channel capacities are raised to 1; use [`Config::validate`] to
    /// reject them instead.
    pub fn new(mut config: Config) -> Self {
        if config.host.command_capacity == 0 {
            tracing::warn!("host.command_capacity is 0, using 1");
            config.host.command_capacity = 1;
        }
        if config.host.notification_capacity == 0 {
            tracing::warn!("host.notification_capacity is 0, using 1");
            config.host.notification_capacity = 1;
        }

        let registry = Arc::new(ServiceRegistry::with_builtins(config.services.default_delay()));
        let broadcaster = Arc::new(EventBroadcaster::new(config.host.notification_capacity));
        Self {
            runner: Arc::new(TokioRunner::new(registry.clone())),
            registry,
            broadcaster,
            charts: DashMap::new(),
            instances: DashMap::new(),
            reserved: DashSet::new(),
            sink: Arc::new(TracingSink),
            predicates: RwLock::new(Predicates::new()),
            shutting_down: AtomicBool::new(false),
            config,
        }
    }

    /// Routes `log` actions of instances spawned afterwards to `sink`.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Services available to `invoke` blocks.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    // =========================================================================
    // Charts
    // =========================================================================

    /// Registers a chart under its id, replacing any previous chart with the
    /// same id. Running instances keep the chart they were spawned with.
    pub fn register_chart(&self, chart: Chart) -> Arc<Chart> {
        let chart = Arc::new(chart);
        tracing::info!(
            chart = chart.id(),
            checksum = chart.checksum(),
            states = chart.len(),
            "chart registered"
        );
        self.charts.insert(chart.id().to_string(), chart.clone());
        chart
    }

    /// Parses, validates and registers a chart definition.
    pub fn register_chart_json(&self, json: &Value) -> Result<Arc<Chart>, RuntimeError> {
        let chart = Chart::from_json(json)?;
        Ok(self.register_chart(chart))
    }

    pub fn chart(&self, chart_id: &str) -> Option<Arc<Chart>> {
        self.charts.get(chart_id).map(|c| c.value().clone())
    }

    /// Registered chart ids, sorted.
    pub fn chart_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.charts.iter().map(|c| c.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Registers a predicate for instances spawned afterwards.
    pub fn register_predicate<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&Context, Option<&Event>) -> bool + Send + Sync + 'static,
    {
        self.predicates.write().insert(name, predicate);
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Starts a new instance of `chart_id`. Returns the instance id, which is
    /// generated when `instance_id` is `None`.
    pub fn spawn_instance(
        &self,
        instance_id: Option<String>,
        chart_id: &str,
        context: Value,
    ) -> Result<String, RuntimeError> {
        self.launch(instance_id, chart_id, context, |interpreter| match interpreter.start() {
            Ok(()) => Ok(()),
            Err(e) if e.is_contained() => {
                tracing::warn!(chart = chart_id, error = %e, "instance started with errors");
                Ok(())
            }
            Err(e) => Err(e),
        })
    }

    /// Brings an instance back from a snapshot without running entry actions.
    pub fn restore_instance(
        &self,
        instance_id: Option<String>,
        snapshot: MachineSnapshot,
    ) -> Result<String, RuntimeError> {
        let chart_id = snapshot.chart.clone();
        self.launch(instance_id, &chart_id, Value::Null, move |interpreter| {
            interpreter.restore(snapshot)
        })
    }

    fn launch<F>(
        &self,
        instance_id: Option<String>,
        chart_id: &str,
        context: Value,
        init: F,
    ) -> Result<String, RuntimeError>
    where
        F: FnOnce(&mut Interpreter) -> Result<(), CoreError>,
    {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(RuntimeError::ShuttingDown);
        }

        let chart = self
            .chart(chart_id)
            .ok_or_else(|| RuntimeError::ChartNotFound(chart_id.to_string()))?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RuntimeError::NoRuntime)?;
        let instance_id = instance_id.unwrap_or_else(|| format!("inst-{}", uuid::Uuid::new_v4()));

        // Reserve before looking at `instances` so two launches of one id
        // cannot both pass the check. No map lock is held while `init` runs.
        if !self.reserved.insert(instance_id.clone()) {
            return Err(RuntimeError::InstanceExists(instance_id));
        }
        let result = self.launch_reserved(&instance_id, chart, context, &runtime, init);
        self.reserved.remove(&instance_id);
        result.map(|()| instance_id)
    }

    fn launch_reserved<F>(
        &self,
        instance_id: &str,
        chart: Arc<Chart>,
        context: Value,
        runtime: &tokio::runtime::Handle,
        init: F,
    ) -> Result<(), RuntimeError>
    where
        F: FnOnce(&mut Interpreter) -> Result<(), CoreError>,
    {
        if self.instances.contains_key(instance_id) {
            return Err(RuntimeError::InstanceExists(instance_id.to_string()));
        }

        let mut interpreter = Interpreter::new(chart.clone(), context)?
            .with_log_sink(self.sink.clone())
            .with_runner(self.runner.clone())
            .with_predicates(self.predicates.read().clone())
            .with_settings(self.config.interpreter.settings());

        let broadcaster = self.broadcaster.clone();
        let source = instance_id.to_string();
        interpreter.subscribe(move |notification: &Notification| {
            broadcaster.notify(InstanceEvent {
                instance_id: source.clone(),
                notification: notification.clone(),
            });
        });

        init(&mut interpreter)?;

        let (commands, receiver) = mpsc::channel(self.config.host.command_capacity);
        let task = runtime.spawn(run_instance(instance_id.to_string(), interpreter, receiver));
        self.instances.insert(
            instance_id.to_string(),
            InstanceHandle {
                chart: chart.id().to_string(),
                commands,
                task,
            },
        );

        tracing::info!(instance = %instance_id, chart = chart.id(), "instance spawned");
        Ok(())
    }

    /// Sends an event to an instance and waits for the outcome.
    pub async fn dispatch(
        &self,
        instance_id: &str,
        event: impl Into<Event>,
    ) -> Result<DispatchOutcome, RuntimeError> {
        let event = event.into();
        let result = self
            .request(instance_id, |reply| Command::Dispatch { event, reply })
            .await?;
        Ok(result?)
    }

    /// Captures an instance's current state.
    pub async fn snapshot(&self, instance_id: &str) -> Result<MachineSnapshot, RuntimeError> {
        self.request(instance_id, |reply| Command::Snapshot { reply }).await
    }

    /// Stops an instance and returns its final snapshot.
    ///
    /// The instance is removed even when an exit action fails; that failure
    /// is returned after the removal.
    pub async fn stop(&self, instance_id: &str) -> Result<MachineSnapshot, RuntimeError> {
        let result = self.request(instance_id, |reply| Command::Stop { reply }).await;

        if let Some((_, handle)) = self.instances.remove(instance_id) {
            if let Err(e) = handle.task.await {
                tracing::warn!(
                    instance = %instance_id,
                    error = %e,
                    "instance task ended abnormally"
                );
            }
        }
        self.broadcaster.close_instance(instance_id);
        tracing::info!(instance = %instance_id, "instance stopped");

        Ok(result??)
    }

    async fn request<T>(
        &self,
        instance_id: &str,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let sender = self
            .instances
            .get(instance_id)
            .map(|h| h.commands.clone())
            .ok_or_else(|| RuntimeError::InstanceNotFound(instance_id.to_string()))?;

        let (reply, answer) = oneshot::channel();
        let exchange = async {
            sender
                .send(command(reply))
                .await
                .map_err(|_| RuntimeError::InstanceNotFound(instance_id.to_string()))?;
            answer
                .await
                .map_err(|_| RuntimeError::InstanceNotFound(instance_id.to_string()))
        };

        match tokio::time::timeout(self.config.host.reply_timeout(), exchange).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout(instance_id.to_string())),
        }
    }

    /// Live instances, sorted by id.
    pub fn list_instances(&self) -> Vec<InstanceInfo> {
        let mut list: Vec<InstanceInfo> = self
            .instances
            .iter()
            .map(|h| InstanceInfo {
                instance_id: h.key().clone(),
                chart: h.chart.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        list
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Watches one instance. The stream ends when the instance is stopped.
    pub fn subscribe_instance(&self, instance_id: &str) -> Result<Watcher, RuntimeError> {
        if !self.instances.contains_key(instance_id) {
            return Err(RuntimeError::InstanceNotFound(instance_id.to_string()));
        }
        Ok(self.broadcaster.subscribe_instance(instance_id))
    }

    /// Watches every instance, present and future.
    pub fn subscribe_all(&self, filter: EventFilter) -> Watcher {
        self.broadcaster.subscribe_all(filter)
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.broadcaster.unsubscribe(subscription_id)
    }

    /// Stops every instance and refuses new ones.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let ids: Vec<String> = self.instances.iter().map(|h| h.key().clone()).collect();
        tracing::info!(instances = ids.len(), "host shutting down");
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                tracing::warn!(instance = %id, error = %e, "error stopping instance");
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

async fn run_instance(
    instance_id: String,
    mut interpreter: Interpreter,
    mut commands: mpsc::Receiver<Command>,
) {
    let signal = interpreter.signal();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Dispatch { event, reply }) => {
                    let result = interpreter.dispatch(event);
                    if let Err(ref e) = result {
                        tracing::debug!(instance = %instance_id, error = %e, "dispatch failed");
                    }
                    let _ = reply.send(result);
                }
                Some(Command::Snapshot { reply }) => {
                    let _ = reply.send(interpreter.snapshot());
                }
                Some(Command::Stop { reply }) => {
                    let result = halt(&mut interpreter).map(|()| interpreter.snapshot());
                    let _ = reply.send(result);
                    break;
                }
                None => {
                    if let Err(e) = halt(&mut interpreter) {
                        tracing::warn!(
                            instance = %instance_id,
                            error = %e,
                            "error stopping orphaned instance"
                        );
                    }
                    break;
                }
            },
            _ = signal.notified() => {
                if let Err(e) = interpreter.process_pending() {
                    tracing::warn!(
                        instance = %instance_id,
                        error = %e,
                        "completion processing failed"
                    );
                }
            }
        }
    }

    tracing::debug!(instance = %instance_id, "instance task finished");
}

fn halt(interpreter: &mut Interpreter) -> Result<(), CoreError> {
    if interpreter.status() == MachineStatus::Running {
        interpreter.stop()
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn door() -> Value {
        json!({
            "id": "door",
            "initial": "closed",
            "context": {"opens": 0},
            "states": {
                "closed": {
                    "on": {"OPEN": {"target": "open", "guard": "!ctx.locked",
                                    "actions": [{"type": "assign", "key": "opens",
                                                 "value": {"expr": "ctx.opens + 1"}}]}}
                },
                "open": {"on": {"CLOSE": "closed"}}
            }
        })
    }

    fn fetcher(src: &str) -> Value {
        json!({
            "id": "fetcher",
            "initial": "loading",
            "states": {
                "loading": {
                    "invoke": {"id": "job", "src": src, "input": {"literal": {"n": 1}}},
                    "on": {
                        "job.done": {"target": "ready",
                                     "actions": [{"type": "assign", "key": "result",
                                                  "value": {"event": "n"}}]},
                        "job.error": "failed"
                    }
                },
                "ready": {},
                "failed": {}
            }
        })
    }

    fn host() -> MachineHost {
        MachineHost::new(Config::default())
    }

    async fn wait_for_target(watcher: &mut Watcher, target: &str) -> InstanceEvent {
        let fut = async {
            loop {
                let event = watcher.recv().await.expect("stream ended");
                if let Notification::Transitioned { target: Some(ref t), .. } = event.notification {
                    if t == target {
                        return event;
                    }
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), fut).await.expect("timed out")
    }

    #[tokio::test]
    async fn test_spawn_dispatch_snapshot() {
        let host = host();
        host.register_chart_json(&door()).unwrap();

        let id = host
            .spawn_instance(Some("door-1".to_string()), "door", json!({"locked": false}))
            .unwrap();
        assert_eq!(id, "door-1");

        let outcome = assert_ok!(host.dispatch(&id, "OPEN").await);
        assert!(outcome.handled);
        assert_eq!(outcome.configuration, vec!["door", "open"]);

        let snapshot = assert_ok!(host.snapshot(&id).await);
        assert_eq!(snapshot.active.as_deref(), Some("open"));
        assert_eq!(snapshot.context["opens"], json!(1));
        assert_eq!(snapshot.status, MachineStatus::Running);
    }

    #[tokio::test]
    async fn test_generated_ids_and_listing() {
        let host = host();
        host.register_chart_json(&door()).unwrap();

        let a = host.spawn_instance(None, "door", Value::Null).unwrap();
        let b = host.spawn_instance(None, "door", Value::Null).unwrap();
        assert!(a.starts_with("inst-"));
        assert_ne!(a, b);

        let listed = host.list_instances();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|i| i.chart == "door"));
    }

    #[tokio::test]
    async fn test_spawn_errors() {
        let host = host();
        let missing = host.spawn_instance(None, "door", Value::Null);
        assert!(matches!(missing, Err(RuntimeError::ChartNotFound(_))));

        host.register_chart_json(&door()).unwrap();
        host.spawn_instance(Some("x".to_string()), "door", Value::Null).unwrap();
        let dup = host.spawn_instance(Some("x".to_string()), "door", Value::Null);
        assert!(matches!(dup, Err(RuntimeError::InstanceExists(_))));

        let bad_ctx = host.spawn_instance(None, "door", json!([1, 2]));
        assert!(matches!(bad_ctx, Err(RuntimeError::Core(_))));
    }

    #[test]
    fn test_spawn_outside_runtime() {
        let host = host();
        host.register_chart_json(&door()).unwrap();

        let result = host.spawn_instance(Some("d".to_string()), "door", Value::Null);
        assert!(matches!(result, Err(RuntimeError::NoRuntime)));
        assert_eq!(host.instance_count(), 0);

        // The id was released and can be used once a runtime is around.
        let rt = tokio::runtime::Runtime::new().unwrap();
        let id = rt.block_on(async {
            host.spawn_instance(Some("d".to_string()), "door", Value::Null)
        });
        assert_eq!(id.unwrap(), "d");
    }

    #[tokio::test]
    async fn test_zero_capacities_raised() {
        let mut config = Config::default();
        config.host.command_capacity = 0;
        config.host.notification_capacity = 0;
        let host = MachineHost::new(config);
        assert_eq!(host.config().host.command_capacity, 1);
        assert_eq!(host.config().host.notification_capacity, 1);

        host.register_chart_json(&door()).unwrap();
        let id = host.spawn_instance(None, "door", json!({"locked": false})).unwrap();
        let outcome = assert_ok!(host.dispatch(&id, "OPEN").await);
        assert!(outcome.handled);
    }

    #[tokio::test]
    async fn test_start_may_query_host() {
        let host = Arc::new(host());
        let weak = Arc::downgrade(&host);
        host.register_predicate("alone", move |_ctx: &Context, _event: Option<&Event>| {
            weak.upgrade().map_or(false, |host| host.list_instances().is_empty())
        });
        host.register_chart_json(&json!({
            "id": "census",
            "initial": "counting",
            "states": {
                "counting": {
                    "entry": [{"type": "raise", "event": "CHECK"}],
                    "on": {"CHECK": {"target": "alone", "guard": {"predicate": "alone"}}}
                },
                "alone": {}
            }
        }))
        .unwrap();

        let first = host.spawn_instance(None, "census", Value::Null).unwrap();
        let second = host.spawn_instance(None, "census", Value::Null).unwrap();

        let snapshot = assert_ok!(host.snapshot(&first).await);
        assert_eq!(snapshot.active.as_deref(), Some("alone"));
        let snapshot = assert_ok!(host.snapshot(&second).await);
        assert_eq!(snapshot.active.as_deref(), Some("counting"));
    }

    #[tokio::test]
    async fn test_contained_dispatch_error_keeps_instance() {
        let host = host();
        host.register_chart_json(&door()).unwrap();
        let id = host.spawn_instance(None, "door", Value::Null).unwrap();

        // `ctx.locked` is missing, so the guard is skipped with a diagnostic.
        let outcome = assert_ok!(host.dispatch(&id, "OPEN").await);
        assert!(!outcome.handled);
        assert_eq!(outcome.diagnostics.len(), 1);

        let snapshot = assert_ok!(host.snapshot(&id).await);
        assert_eq!(snapshot.active.as_deref(), Some("closed"));
    }

    #[tokio::test]
    async fn test_stop_removes_instance() {
        let host = host();
        host.register_chart_json(&door()).unwrap();
        let id = host.spawn_instance(None, "door", Value::Null).unwrap();
        let mut watcher = host.subscribe_instance(&id).unwrap();

        let snapshot = assert_ok!(host.stop(&id).await);
        assert_eq!(snapshot.status, MachineStatus::Stopped);
        assert!(snapshot.configuration.is_empty());
        assert_eq!(host.instance_count(), 0);

        let result = host.dispatch(&id, "OPEN").await;
        assert!(matches!(result, Err(RuntimeError::InstanceNotFound(_))));

        // Exited notifications, then Stopped, then the end of the stream.
        let mut kinds = Vec::new();
        while let Some(event) = watcher.recv().await {
            kinds.push(event.notification.kind());
        }
        assert_eq!(kinds.last(), Some(&"stopped"));
    }

    #[tokio::test]
    async fn test_subscribe_unknown_instance() {
        let host = host();
        assert!(matches!(
            host.subscribe_instance("nope"),
            Err(RuntimeError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invocation_completion_drives_machine() {
        let host = host();
        host.register_chart_json(&fetcher("echo")).unwrap();
        let mut watcher = host.subscribe_all(EventFilter {
            kinds: vec!["transitioned".to_string()],
            ..Default::default()
        });

        let id = host.spawn_instance(None, "fetcher", Value::Null).unwrap();
        let event = wait_for_target(&mut watcher, "ready").await;
        assert_eq!(event.instance_id, id);

        let snapshot = assert_ok!(host.snapshot(&id).await);
        assert_eq!(snapshot.context["result"], json!(1));
    }

    #[tokio::test]
    async fn test_failed_and_unknown_services() {
        let host = host();
        host.register_chart_json(&fetcher("fail")).unwrap();
        let mut watcher = host.subscribe_all(EventFilter::default());
        host.spawn_instance(None, "fetcher", Value::Null).unwrap();
        wait_for_target(&mut watcher, "failed").await;

        let host = MachineHost::new(Config::default());
        host.register_chart_json(&fetcher("missing")).unwrap();
        let mut watcher = host.subscribe_all(EventFilter::default());
        host.spawn_instance(None, "fetcher", Value::Null).unwrap();
        wait_for_target(&mut watcher, "failed").await;
    }

    #[tokio::test]
    async fn test_custom_service_and_predicate() {
        let host = host();
        host.registry().register("answer", |_input: Value| async move {
            arbor_core::InvokeOutcome::Done(json!({"n": 42}))
        });
        host.register_predicate("always", |_ctx: &Context, _event: Option<&Event>| true);
        host.register_chart_json(&json!({
            "id": "fetcher",
            "initial": "loading",
            "states": {
                "loading": {
                    "invoke": {"id": "job", "src": "answer"},
                    "on": {"job.done": {"target": "ready", "guard": {"predicate": "always"},
                                        "actions": [{"type": "assign", "key": "result",
                                                     "value": {"event": "n"}}]}}
                },
                "ready": {}
            }
        }))
        .unwrap();

        let mut watcher = host.subscribe_all(EventFilter::default());
        let id = host.spawn_instance(None, "fetcher", Value::Null).unwrap();
        wait_for_target(&mut watcher, "ready").await;
        let snapshot = assert_ok!(host.snapshot(&id).await);
        assert_eq!(snapshot.context["result"], json!(42));
    }

    #[tokio::test]
    async fn test_restore_instance() {
        let host = host();
        host.register_chart_json(&door()).unwrap();
        let id = host.spawn_instance(None, "door", json!({"locked": false})).unwrap();
        assert_ok!(host.dispatch(&id, "OPEN").await);
        let snapshot = assert_ok!(host.snapshot(&id).await);

        let restored = host
            .restore_instance(Some("door-copy".to_string()), snapshot)
            .unwrap();
        let copy = assert_ok!(host.snapshot(&restored).await);
        assert_eq!(copy.active.as_deref(), Some("open"));
        assert_eq!(copy.context["opens"], json!(1));

        let outcome = assert_ok!(host.dispatch(&restored, "CLOSE").await);
        assert_eq!(outcome.configuration, vec!["door", "closed"]);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let host = host();
        host.register_chart_json(&door()).unwrap();
        host.spawn_instance(None, "door", Value::Null).unwrap();
        host.spawn_instance(None, "door", Value::Null).unwrap();

        host.shutdown().await;
        assert!(host.is_shutting_down());
        assert_eq!(host.instance_count(), 0);
        assert!(matches!(
            host.spawn_instance(None, "door", Value::Null),
            Err(RuntimeError::ShuttingDown)
        ));
    }
}
