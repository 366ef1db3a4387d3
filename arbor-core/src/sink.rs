//! Destinations for `log` actions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a `log` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// A resolved log line produced by a `log` action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Chart id of the emitting machine.
    pub machine: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub message: Value,
}

/// Receives log records emitted by actions.
pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

/// Forwards records to `tracing` at the record's level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, record: LogRecord) {
        let label = record.label.as_deref().unwrap_or("");
        let machine = record.machine.as_str();
        let message = &record.message;
        match record.level {
            LogLevel::Trace => tracing::trace!(machine, label, %message, "machine log"),
            LogLevel::Debug => tracing::debug!(machine, label, %message, "machine log"),
            LogLevel::Info => tracing::info!(machine, label, %message, "machine log"),
            LogLevel::Warn => tracing::warn!(machine, label, %message, "machine log"),
            LogLevel::Error => tracing::error!(machine, label, %message, "machine log"),
        }
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all records received so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Returns just the messages, in order.
    pub fn messages(&self) -> Vec<Value> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn log(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        for i in 0..3 {
            sink.log(LogRecord {
                machine: "m".to_string(),
                level: LogLevel::Info,
                label: None,
                message: json!(i),
            });
        }
        assert_eq!(sink.messages(), vec![json!(0), json!(1), json!(2)]);

        sink.clear();
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_level_serde() {
        let level: LogLevel = serde_json::from_value(json!("warn")).unwrap();
        assert_eq!(level, LogLevel::Warn);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}
