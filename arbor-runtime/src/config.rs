//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via ARBOR_CONFIG)
//! 3. Environment variables

use arbor_core::{GuardErrorPolicy, InterpreterSettings, RaisePolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chart definition loaded by the `arbor` binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<PathBuf>,
    /// Interpreter policies applied to every instance.
    pub interpreter: InterpreterConfig,
    /// Host configuration.
    pub host: HostConfig,
    /// Built-in service configuration.
    pub services: ServicesConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Self::default();

        // Load from file if specified
        if let Ok(path) = std::env::var("ARBOR_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("ARBOR_DEFINITION") {
            if !path.is_empty() {
                self.definition = Some(PathBuf::from(path));
            }
        }
        self.interpreter.apply_env_overrides();
        self.host.apply_env_overrides();
        self.services.apply_env_overrides();
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interpreter.max_microsteps == 0 {
            return Err(ConfigError::ValidationError(
                "interpreter.max_microsteps must be at least 1".to_string(),
            ));
        }
        if self.host.command_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "host.command_capacity must be at least 1".to_string(),
            ));
        }
        if self.host.notification_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "host.notification_capacity must be at least 1".to_string(),
            ));
        }
        if self.host.reply_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "host.reply_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Interpreter policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// `skip` or `fail`.
    pub guard_errors: GuardErrorPolicy,
    /// `queue` or `reject`.
    pub raise_policy: RaisePolicy,
    /// Events processed per dispatch before giving up.
    pub max_microsteps: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        let settings = InterpreterSettings::default();
        Self {
            guard_errors: settings.guard_errors,
            raise_policy: settings.raise_policy,
            max_microsteps: settings.max_microsteps,
        }
    }
}

impl InterpreterConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(policy) = std::env::var("ARBOR_GUARD_ERRORS") {
            match policy.to_lowercase().as_str() {
                "skip" => self.guard_errors = GuardErrorPolicy::Skip,
                "fail" => self.guard_errors = GuardErrorPolicy::Fail,
                other => tracing::warn!("ignoring ARBOR_GUARD_ERRORS={}", other),
            }
        }

        if let Ok(policy) = std::env::var("ARBOR_RAISE_POLICY") {
            match policy.to_lowercase().as_str() {
                "queue" => self.raise_policy = RaisePolicy::Queue,
                "reject" => self.raise_policy = RaisePolicy::Reject,
                other => tracing::warn!("ignoring ARBOR_RAISE_POLICY={}", other),
            }
        }

        if let Ok(max) = std::env::var("ARBOR_MAX_MICROSTEPS") {
            if let Ok(n) = max.parse() {
                self.max_microsteps = n;
            }
        }
    }

    /// Settings handed to each interpreter.
    pub fn settings(&self) -> InterpreterSettings {
        InterpreterSettings {
            guard_errors: self.guard_errors,
            raise_policy: self.raise_policy,
            max_microsteps: self.max_microsteps,
        }
    }
}

/// Host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Capacity of each instance's command channel.
    pub command_capacity: usize,
    /// Capacity of each notification broadcast channel.
    pub notification_capacity: usize,
    /// How long a caller waits for an instance to answer, in milliseconds.
    pub reply_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            notification_capacity: 1024,
            reply_timeout_ms: 5000,
        }
    }
}

impl HostConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(capacity) = std::env::var("ARBOR_COMMAND_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.command_capacity = n;
            }
        }

        if let Ok(capacity) = std::env::var("ARBOR_NOTIFICATION_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.notification_capacity = n;
            }
        }

        if let Ok(timeout) = std::env::var("ARBOR_REPLY_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.reply_timeout_ms = ms;
            }
        }
    }

    /// Returns the reply timeout as Duration.
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Built-in service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Sleep used by the `delay` service when the input names none.
    pub default_delay_ms: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 100,
        }
    }
}

impl ServicesConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(delay) = std::env::var("ARBOR_SERVICE_DELAY_MS") {
            if let Ok(ms) = delay.parse() {
                self.default_delay_ms = ms;
            }
        }
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
