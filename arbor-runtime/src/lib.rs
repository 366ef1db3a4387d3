//! # arbor-runtime
//!
//! Async host for arbor statecharts.
//!
//! This crate provides:
//! - One tokio task per instance, driven through a command channel
//! - Invoked services run as tasks, with a registry of named services
//! - Notification fan-out to per-instance and global subscribers
//! - YAML and environment configuration

pub mod broadcast;
pub mod config;
pub mod error;
pub mod host;
pub mod services;

pub use broadcast::{
    EventBroadcaster, EventFilter, InstanceEvent, Subscription, SubscriptionType, Watcher,
};
pub use config::{Config, ConfigError, HostConfig, InterpreterConfig, ServicesConfig};
pub use error::RuntimeError;
pub use host::{InstanceInfo, MachineHost};
pub use services::{Service, ServiceRegistry, TokioRunner};
