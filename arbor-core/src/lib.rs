//! # arbor-core
//!
//! Hierarchical statechart interpreter for arbor.
//!
//! This crate provides:
//! - Chart definition parsing and validation (nested JSON DSL)
//! - Transition selection and execution over nested states
//! - Guard and value expression evaluation
//! - Entry, exit and transition actions over a mutable context
//! - The invocation contract for long-running services

pub mod action;
pub mod context;
pub mod definition;
pub mod error;
pub mod event;
pub mod expr;
pub mod guard;
pub mod interpreter;
pub mod invoke;
pub mod observer;
pub mod sink;
pub mod value;

pub use action::{Action, RaisePolicy};
pub use context::Context;
pub use definition::{Chart, ChartDefinitionRaw, StateIdx, StateNodeRaw, TransitionRaw};
pub use error::{ActionFailure, CoreError, ResolutionError};
pub use event::Event;
pub use expr::Expression;
pub use guard::{Guard, Predicates};
pub use interpreter::{
    Diagnostic, DispatchOutcome, GuardErrorPolicy, Interpreter, InterpreterSettings,
    MachineSnapshot, MachineStatus,
};
pub use invoke::{Completer, InvocationToken, InvokeDef, InvokeOutcome, InvokeRequest, InvokeRunner};
pub use observer::{Notification, Observer};
pub use sink::{LogLevel, LogRecord, LogSink, MemorySink, TracingSink};
pub use value::ValueProvider;
