//! Statechart interpreter.
//!
//! An [`Interpreter`] owns one running machine: its configuration (the
//! active path from the root to a leaf), its context, and the invocations
//! of its active states. It is driven synchronously through [`start`],
//! [`dispatch`], [`process_pending`] and [`stop`].
//!
//! Transition selection walks the configuration from the leaf upward. The
//! first state that declares transitions for the event name is searched in
//! declaration order and the first transition whose guard passes is taken.
//! If none passes the search continues with the ancestors.
//!
//! [`start`]: Interpreter::start
//! [`dispatch`]: Interpreter::dispatch
//! [`process_pending`]: Interpreter::process_pending
//! [`stop`]: Interpreter::stop

use crate::action::{Action, ActionScope, RaisePolicy};
use crate::context::Context;
use crate::definition::{Chart, StateIdx, Transition};
use crate::error::CoreError;
use crate::event::Event;
use crate::guard::{GuardEvaluator, Predicates};
use crate::invoke::{
    completion_channel, Completer, Completion, InvocationToken, InvokeRequest, InvokeRunner,
    NullRunner,
};
use crate::observer::{Notification, Observer};
use crate::sink::{LogSink, TracingSink};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// Lifecycle status of an interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Uninitialized,
    Running,
    Stopped,
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineStatus::Uninitialized => "uninitialized",
            MachineStatus::Running => "running",
            MachineStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// What to do when a guard cannot be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardErrorPolicy {
    /// Treat the guard as false, record a diagnostic and keep searching.
    #[default]
    Skip,
    /// Fail the dispatch.
    Fail,
}

/// Tunables for an interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterSettings {
    pub guard_errors: GuardErrorPolicy,
    pub raise_policy: RaisePolicy,
    /// Maximum events processed for one dispatched event, raised ones included.
    pub max_microsteps: usize,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            guard_errors: GuardErrorPolicy::Skip,
            raise_policy: RaisePolicy::Queue,
            max_microsteps: 1000,
        }
    }
}

/// A contained problem encountered while processing an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Event being processed.
    pub event: String,
    pub code: &'static str,
    pub message: String,
}

impl Diagnostic {
    fn from_error(event: &str, error: &CoreError) -> Self {
        Self {
            event: event.to_string(),
            code: error.error_code(),
            message: error.to_string(),
        }
    }
}

/// Result of [`Interpreter::dispatch`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub event: String,
    /// Whether the dispatched event selected a transition.
    pub handled: bool,
    /// Active state ids after processing, root first.
    pub configuration: Vec<String>,
    /// Number of events processed, raised events and completions included.
    pub processed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Serializable state of an interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    /// Chart id.
    pub chart: String,
    /// Checksum of the chart the snapshot was taken from.
    pub checksum: String,
    pub status: MachineStatus,
    /// Active leaf, if running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
    #[serde(default)]
    pub configuration: Vec<String>,
    pub context: Value,
}

/// Identifies an observer registration.
pub type SubscriptionId = u64;

/// Runs one statechart instance.
pub struct Interpreter {
    chart: Arc<Chart>,
    context: Context,
    status: MachineStatus,
    /// Active states, root first.
    configuration: Vec<StateIdx>,
    settings: InterpreterSettings,
    predicates: Predicates,
    sink: Arc<dyn LogSink>,
    runner: Arc<dyn InvokeRunner>,
    observers: Vec<(SubscriptionId, Arc<dyn Observer>)>,
    next_subscription: SubscriptionId,
    /// Current token per invoke id.
    invocations: HashMap<String, InvocationToken>,
    generation: u64,
    completer: Completer,
    completions: mpsc::UnboundedReceiver<Completion>,
    signal: Arc<Notify>,
}

impl Interpreter {
    /// Creates an interpreter for `chart`. `initial` is merged over the
    /// chart's default context (`null` for none).
    pub fn new(chart: Arc<Chart>, initial: Value) -> Result<Self, CoreError> {
        let context = Context::merged(chart.default_context(), initial)?;
        let (completer, completions, signal) = completion_channel();
        Ok(Self {
            chart,
            context,
            status: MachineStatus::Uninitialized,
            configuration: Vec::new(),
            settings: InterpreterSettings::default(),
            predicates: Predicates::new(),
            sink: Arc::new(TracingSink),
            runner: Arc::new(NullRunner),
            observers: Vec::new(),
            next_subscription: 0,
            invocations: HashMap::new(),
            generation: 0,
            completer,
            completions,
            signal,
        })
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn InvokeRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Registers a named predicate for `{"predicate": name}` guards.
    pub fn with_predicate<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Context, Option<&Event>) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name, predicate);
        self
    }

    pub fn with_predicates(mut self, predicates: Predicates) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn with_settings(mut self, settings: InterpreterSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Registers an observer and returns its subscription id.
    pub fn subscribe(&mut self, observer: impl Observer + 'static) -> SubscriptionId {
        self.subscribe_arc(Arc::new(observer))
    }

    pub fn subscribe_arc(&mut self, observer: Arc<dyn Observer>) -> SubscriptionId {
        self.next_subscription += 1;
        let id = self.next_subscription;
        self.observers.push((id, observer));
        id
    }

    /// Removes an observer. Returns false if the id was unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Enters the initial configuration.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.require(MachineStatus::Uninitialized, "start")?;

        let chart = Arc::clone(&self.chart);
        if let Some(missing) = chart
            .predicate_names()
            .into_iter()
            .find(|name| !self.predicates.contains(name))
        {
            return Err(CoreError::invalid(format!(
                "guard predicate '{}' is not registered",
                missing
            )));
        }

        self.status = MachineStatus::Running;
        info!(machine = chart.id(), checksum = chart.checksum(), "starting machine");

        let mut entering = vec![Chart::ROOT];
        entering.extend(chart.initial_chain(Chart::ROOT));

        let mut raised = Vec::new();
        self.enter(&chart, &entering, None, &mut raised, chart.id(), chart.id())?;

        let configuration = self.configuration_ids();
        self.emit(|| Notification::Started {
            machine: chart.id().to_string(),
            configuration,
        });

        if !raised.is_empty() {
            let mut diagnostics = Vec::new();
            self.drain(&chart, raised.into(), &mut diagnostics)?;
        }
        Ok(())
    }

    /// Processes one event and everything it raises.
    pub fn dispatch(&mut self, event: impl Into<Event>) -> Result<DispatchOutcome, CoreError> {
        let event = event.into();
        self.require(MachineStatus::Running, "dispatch")?;
        let chart = Arc::clone(&self.chart);

        let mut diagnostics = Vec::new();
        let mut processed = 0;

        // Completions that arrived before this event go first.
        for completion in self.take_completions() {
            let name = completion.to_event().name;
            match self.process_completion(&chart, completion, &mut diagnostics) {
                Ok(n) => processed += n,
                Err(e) => {
                    warn!(machine = chart.id(), event = %name, error = %e, "completion failed");
                    diagnostics.push(Diagnostic::from_error(&name, &e));
                }
            }
        }

        let (handled, n) = self.run_to_completion(&chart, event.clone(), &mut diagnostics)?;
        processed += n;

        Ok(DispatchOutcome {
            event: event.name,
            handled,
            configuration: self.configuration_ids(),
            processed,
            diagnostics,
        })
    }

    /// Processes invocation completions that arrived since the last call.
    ///
    /// Returns the number of completions processed. When the machine is not
    /// running the completions are discarded.
    pub fn process_pending(&mut self) -> Result<usize, CoreError> {
        let pending = self.take_completions();
        if self.status != MachineStatus::Running {
            if !pending.is_empty() {
                debug!(
                    machine = self.chart.id(),
                    count = pending.len(),
                    "discarding completions, machine not running"
                );
            }
            return Ok(0);
        }

        let chart = Arc::clone(&self.chart);
        let mut diagnostics = Vec::new();
        let mut count = 0;
        let mut first_error = None;
        for completion in pending {
            match self.process_completion(&chart, completion, &mut diagnostics) {
                Ok(0) => {}
                Ok(_) => count += 1,
                Err(e) => {
                    warn!(machine = chart.id(), error = %e, "completion failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Exits every active state and stops the machine.
    ///
    /// Exit failures do not interrupt the shutdown; the first one is returned.
    pub fn stop(&mut self) -> Result<(), CoreError> {
        self.require(MachineStatus::Running, "stop")?;
        let chart = Arc::clone(&self.chart);

        let mut first_error = None;
        let mut raised = Vec::new();
        while let Some(&idx) = self.configuration.last() {
            let state = chart.state(idx);
            let exited =
                self.run_actions(&chart, &state.exit, None, &mut raised, &state.id, "(stopped)");
            if let Err(e) = exited {
                warn!(
                    machine = chart.id(),
                    state = %state.id,
                    error = %e,
                    "exit failed during stop"
                );
                first_error.get_or_insert(e);
            }
            self.stop_invocation(&chart, idx);
            self.configuration.pop();
            self.emit(|| Notification::Exited {
                machine: chart.id().to_string(),
                state: state.id.clone(),
            });
        }

        for (_, token) in self.invocations.drain() {
            self.runner.stop(&token);
        }
        let discarded = self.take_completions().len();
        self.status = MachineStatus::Stopped;
        info!(machine = chart.id(), discarded, "machine stopped");
        self.emit(|| Notification::Stopped {
            machine: chart.id().to_string(),
        });

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rebuilds an unstarted interpreter from a snapshot.
    ///
    /// No entry actions run. Invocations of the restored active states are
    /// started again with fresh tokens.
    pub fn restore(&mut self, snapshot: MachineSnapshot) -> Result<(), CoreError> {
        self.require(MachineStatus::Uninitialized, "restore")?;
        let chart = Arc::clone(&self.chart);

        if snapshot.chart != chart.id() {
            return Err(CoreError::invalid(format!(
                "snapshot is for chart '{}', not '{}'",
                snapshot.chart,
                chart.id()
            )));
        }
        if snapshot.checksum != chart.checksum() {
            return Err(CoreError::ChecksumMismatch {
                expected: chart.checksum().to_string(),
                actual: snapshot.checksum,
            });
        }

        let configuration = match (snapshot.status, &snapshot.active) {
            (MachineStatus::Running, Some(leaf)) => {
                let idx = chart.lookup(leaf).ok_or_else(|| {
                    CoreError::invalid(format!("snapshot state '{}' not in chart", leaf))
                })?;
                chart.path_to(idx)
            }
            (MachineStatus::Running, None) => {
                return Err(CoreError::invalid("running snapshot without an active state"));
            }
            _ => Vec::new(),
        };
        let context = Context::from_value(snapshot.context)?;

        self.context = context;
        self.configuration = configuration;
        self.status = snapshot.status;

        if self.status == MachineStatus::Running {
            let active = self.configuration.clone();
            self.start_invocations(&chart, &active);
            info!(machine = chart.id(), active = ?snapshot.active, "machine restored");
            let configuration = self.configuration_ids();
            self.emit(|| Notification::Started {
                machine: chart.id().to_string(),
                configuration,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn chart(&self) -> &Arc<Chart> {
        &self.chart
    }

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn settings(&self) -> &InterpreterSettings {
        &self.settings
    }

    /// Active state ids, root first.
    pub fn configuration(&self) -> Vec<&str> {
        self.configuration
            .iter()
            .map(|&idx| self.chart.state(idx).id.as_str())
            .collect()
    }

    /// Id of the innermost active state.
    pub fn active_leaf(&self) -> Option<&str> {
        self.configuration
            .last()
            .map(|&idx| self.chart.state(idx).id.as_str())
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.chart
            .lookup(id)
            .is_some_and(|idx| self.configuration.contains(&idx))
    }

    /// Event names declared by any active state, sorted. Guards are not
    /// evaluated.
    pub fn enabled_events(&self) -> Vec<String> {
        let mut events: Vec<String> = self
            .configuration
            .iter()
            .flat_map(|&idx| self.chart.state(idx).transitions.keys().cloned())
            .collect();
        events.sort();
        events.dedup();
        events
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            chart: self.chart.id().to_string(),
            checksum: self.chart.checksum().to_string(),
            status: self.status,
            active: self.active_leaf().map(str::to_string),
            configuration: self.configuration_ids(),
            context: self.context.snapshot(),
        }
    }

    /// Signal raised whenever a completion is queued.
    ///
    /// Hosts wait on it and call [`process_pending`](Self::process_pending).
    pub fn signal(&self) -> Arc<Notify> {
        Arc::clone(&self.signal)
    }

    /// Handle for reporting completions from outside a runner.
    pub fn completer(&self) -> Completer {
        self.completer.clone()
    }

    // =========================================================================
    // Processing
    // =========================================================================

    fn require(&self, expected: MachineStatus, operation: &'static str) -> Result<(), CoreError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(CoreError::Lifecycle {
                operation,
                status: self.status,
            })
        }
    }

    fn take_completions(&mut self) -> Vec<Completion> {
        let mut pending = Vec::new();
        while let Ok(completion) = self.completions.try_recv() {
            pending.push(completion);
        }
        pending
    }

    /// Returns the number of events processed, 0 for a stale completion.
    fn process_completion(
        &mut self,
        chart: &Chart,
        completion: Completion,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<usize, CoreError> {
        let token = &completion.token;
        if self.invocations.get(&token.invoke_id) != Some(token) {
            debug!(machine = chart.id(), token = %token, "discarding stale completion");
            return Ok(0);
        }
        self.invocations.remove(&token.invoke_id);
        let (_, processed) = self.run_to_completion(chart, completion.to_event(), diagnostics)?;
        Ok(processed)
    }

    /// Processes `event` and the events it raises, then notifies observers.
    fn run_to_completion(
        &mut self,
        chart: &Chart,
        event: Event,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(bool, usize), CoreError> {
        let name = event.name.clone();
        let mut queue = VecDeque::new();
        queue.push_back(event);
        let (handled, processed) = self.drain(chart, queue, diagnostics)?;

        let configuration = self.configuration_ids();
        let context = self.context.snapshot();
        self.emit(|| Notification::Dispatched {
            machine: chart.id().to_string(),
            event: name,
            handled,
            configuration,
            context,
        });
        Ok((handled, processed))
    }

    /// Processes queued events FIFO. Returns whether the first one selected
    /// a transition and how many were processed. On error the rest of the
    /// queue is dropped.
    fn drain(
        &mut self,
        chart: &Chart,
        mut queue: VecDeque<Event>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(bool, usize), CoreError> {
        let limit = self.settings.max_microsteps;
        let mut processed = 0;
        let mut handled = false;

        while let Some(event) = queue.pop_front() {
            if processed >= limit {
                warn!(
                    machine = chart.id(),
                    limit,
                    dropped = queue.len() + 1,
                    "microstep limit reached"
                );
                return Err(CoreError::MicrostepLimit { limit });
            }
            processed += 1;

            let mut raised = Vec::new();
            let took = self.microstep(chart, &event, &mut raised, diagnostics)?;
            if processed == 1 {
                handled = took;
            }
            queue.extend(raised);
        }
        Ok((handled, processed))
    }

    fn microstep(
        &mut self,
        chart: &Chart,
        event: &Event,
        raised: &mut Vec<Event>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<bool, CoreError> {
        match self.select(chart, event, diagnostics)? {
            Some(transition) => {
                self.execute(chart, transition, event, raised)?;
                Ok(true)
            }
            None => {
                debug!(machine = chart.id(), event = %event.name, "no enabled transition");
                Ok(false)
            }
        }
    }

    fn select<'c>(
        &self,
        chart: &'c Chart,
        event: &Event,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<&'c Transition>, CoreError> {
        let evaluator = GuardEvaluator::new(&self.predicates);

        for &idx in self.configuration.iter().rev() {
            let state = chart.state(idx);
            let Some(candidates) = state.transitions_for(&event.name) else {
                continue;
            };

            for transition in candidates {
                let guard = transition.guard.as_ref();
                match evaluator.evaluate_opt(guard, &self.context, Some(event)) {
                    Ok(true) => {
                        debug!(
                            machine = chart.id(),
                            event = %event.name,
                            state = %state.id,
                            "transition selected"
                        );
                        return Ok(Some(transition));
                    }
                    Ok(false) => {}
                    Err(reason) => {
                        let error = CoreError::GuardEvaluation {
                            guard: transition
                                .guard
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_default(),
                            state: state.id.clone(),
                            event: event.name.clone(),
                            reason,
                        };
                        if self.settings.guard_errors == GuardErrorPolicy::Fail {
                            return Err(error);
                        }
                        warn!(
                            machine = chart.id(),
                            error = %error,
                            "guard failed, treating as false"
                        );
                        diagnostics.push(Diagnostic::from_error(&event.name, &error));
                    }
                }
            }
        }
        Ok(None)
    }

    fn execute(
        &mut self,
        chart: &Chart,
        transition: &Transition,
        event: &Event,
        raised: &mut Vec<Event>,
    ) -> Result<(), CoreError> {
        let source = &chart.state(transition.source).id;

        let Some(target) = transition.target else {
            self.run_actions(chart, &transition.actions, Some(event), raised, source, source)?;
            self.emit(|| Notification::Transitioned {
                machine: chart.id().to_string(),
                event: event.name.clone(),
                source: source.clone(),
                target: None,
            });
            return Ok(());
        };

        let target_id = &chart.state(target).id;
        let keep = chart
            .transition_domain(transition.source, target)
            .map_or(0, |domain| chart.state(domain).depth + 1);

        while self.configuration.len() > keep {
            self.exit_innermost(chart, Some(event), raised, source, target_id)?;
        }

        self.run_actions(chart, &transition.actions, Some(event), raised, source, target_id)?;

        let mut entering = chart.path_to(target).split_off(keep);
        entering.extend(chart.initial_chain(target));
        self.enter(chart, &entering, Some(event), raised, source, target_id)?;

        self.emit(|| Notification::Transitioned {
            machine: chart.id().to_string(),
            event: event.name.clone(),
            source: source.clone(),
            target: Some(target_id.clone()),
        });
        Ok(())
    }

    /// Runs the exit actions of the innermost active state, stops its
    /// invocation and deactivates it. A failing state stays active.
    fn exit_innermost(
        &mut self,
        chart: &Chart,
        event: Option<&Event>,
        raised: &mut Vec<Event>,
        source: &str,
        target: &str,
    ) -> Result<(), CoreError> {
        let Some(&idx) = self.configuration.last() else {
            return Ok(());
        };
        let state = chart.state(idx);
        self.run_actions(chart, &state.exit, event, raised, source, target)?;
        self.stop_invocation(chart, idx);
        self.configuration.pop();
        debug!(machine = chart.id(), state = %state.id, "exited");
        self.emit(|| Notification::Exited {
            machine: chart.id().to_string(),
            state: state.id.clone(),
        });
        Ok(())
    }

    /// Activates `states` outermost first, running entry actions after each
    /// activation, then starts their invocations. When an entry action fails
    /// the states activated so far still get their invocations.
    fn enter(
        &mut self,
        chart: &Chart,
        states: &[StateIdx],
        event: Option<&Event>,
        raised: &mut Vec<Event>,
        source: &str,
        target: &str,
    ) -> Result<(), CoreError> {
        for (position, &idx) in states.iter().enumerate() {
            let state = chart.state(idx);
            self.configuration.push(idx);
            debug!(machine = chart.id(), state = %state.id, "entered");
            self.emit(|| Notification::Entered {
                machine: chart.id().to_string(),
                state: state.id.clone(),
            });
            if let Err(e) = self.run_actions(chart, &state.entry, event, raised, source, target) {
                self.start_invocations(chart, &states[..=position]);
                return Err(e);
            }
        }
        self.start_invocations(chart, states);
        Ok(())
    }

    fn run_actions(
        &mut self,
        chart: &Chart,
        actions: &[Action],
        event: Option<&Event>,
        raised: &mut Vec<Event>,
        source: &str,
        target: &str,
    ) -> Result<(), CoreError> {
        let mut scope = ActionScope {
            machine: chart.id(),
            sink: self.sink.as_ref(),
            raised,
            raise_policy: self.settings.raise_policy,
        };
        for action in actions {
            action
                .apply(&mut self.context, event, &mut scope)
                .map_err(|reason| CoreError::ActionExecution {
                    action: action.describe(),
                    source_state: source.to_string(),
                    target: target.to_string(),
                    reason,
                })?;
        }
        Ok(())
    }

    fn start_invocations(&mut self, chart: &Chart, states: &[StateIdx]) {
        for &idx in states {
            let Some(invoke) = &chart.state(idx).invoke else {
                continue;
            };

            self.generation += 1;
            let token = InvocationToken {
                invoke_id: invoke.id.clone(),
                generation: self.generation,
            };
            self.invocations.insert(invoke.id.clone(), token.clone());

            let input = match &invoke.input {
                Some(provider) => provider.resolve(&self.context, None),
                None => Ok(Value::Null),
            };
            match input {
                Ok(input) => {
                    debug!(
                        machine = chart.id(),
                        token = %token,
                        src = %invoke.src,
                        "starting invocation"
                    );
                    self.runner.start(
                        InvokeRequest {
                            token,
                            machine: chart.id().to_string(),
                            src: invoke.src.clone(),
                            input,
                        },
                        self.completer.clone(),
                    );
                }
                Err(e) => {
                    warn!(
                        machine = chart.id(),
                        token = %token,
                        error = %e,
                        "invocation input failed"
                    );
                    self.completer.fail(token, json!({"message": e.to_string()}));
                }
            }
        }
    }

    fn stop_invocation(&mut self, chart: &Chart, idx: StateIdx) {
        if let Some(invoke) = &chart.state(idx).invoke {
            if let Some(token) = self.invocations.remove(&invoke.id) {
                debug!(machine = chart.id(), token = %token, "stopping invocation");
                self.runner.stop(&token);
            }
        }
    }

    fn configuration_ids(&self) -> Vec<String> {
        self.configuration
            .iter()
            .map(|&idx| self.chart.state(idx).id.clone())
            .collect()
    }

    fn emit(&self, build: impl FnOnce() -> Notification) {
        if self.observers.is_empty() {
            return;
        }
        let notification = build();
        for (_, observer) in &self.observers {
            observer.notify(&notification);
        }
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("chart", &self.chart.id())
            .field("status", &self.status)
            .field("configuration", &self.configuration())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
