//! arbor - headless statechart runner
//!
//! Loads one chart definition, starts an instance and feeds it events read
//! from stdin, one per line: either a bare event name or
//! `{"event": "NAME", "data": ...}`. Every notification is written to stdout
//! as a JSON line.

use arbor_core::{Event, Notification};
use arbor_runtime::{Config, EventFilter, MachineHost};
use serde_json::{json, Value};
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries notifications only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration (from file if ARBOR_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    let Some(definition) = config.definition.clone() else {
        tracing::error!(
            "No chart definition: set ARBOR_DEFINITION or `definition` in the config file"
        );
        return Err("no chart definition configured".into());
    };

    tracing::info!("Starting arbor");
    tracing::info!("  Definition: {}", definition.display());
    tracing::info!("  Guard errors: {:?}", config.interpreter.guard_errors);
    tracing::info!("  Raise policy: {:?}", config.interpreter.raise_policy);
    tracing::info!("  Max microsteps: {}", config.interpreter.max_microsteps);

    let content = std::fs::read_to_string(&definition)?;
    let json: Value = serde_json::from_str(&content)?;

    let host = MachineHost::new(config);
    let chart = host.register_chart_json(&json)?;

    // Subscribe before spawning so the start notifications are printed.
    let mut watcher = host.subscribe_all(EventFilter::default());
    let printer = tokio::spawn(async move {
        while let Some(event) = watcher.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!("Failed to encode notification: {}", e),
            }
            if matches!(event.notification, Notification::Stopped { .. }) {
                break;
            }
        }
    });

    let instance = match host.spawn_instance(None, chart.id(), Value::Null) {
        Ok(id) => id,
        Err(e) => {
            printer.abort();
            return Err(e.into());
        }
    };

    let mut lines = spawn_stdin_reader();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    tracing::info!("End of input");
                    break;
                };

                let event = match parse_line(&line) {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(e) => {
                        print_error("BAD_REQUEST", &e.to_string());
                        continue;
                    }
                };

                if let Err(e) = host.dispatch(&instance, event).await {
                    tracing::warn!("Dispatch failed: {}", e);
                    print_error(e.error_code(), &e.to_string());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping...");
                break;
            }
        }
    }

    host.shutdown().await;
    let _ = printer.await;

    tracing::info!("Stopped");
    Ok(())
}

/// Reads stdin on a dedicated thread. The channel closes at end of input.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Parses one input line. Blank lines and `#` comments yield `None`.
fn parse_line(line: &str) -> Result<Option<Event>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if line.starts_with('{') {
        return serde_json::from_str(line).map(Some);
    }
    Ok(Some(Event::new(line)))
}

fn print_error(code: &str, message: &str) {
    println!("{}", json!({"type": "error", "code": code, "message": message}));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("  OPEN ").unwrap(), Some(Event::new("OPEN")));
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("# comment").unwrap(), None);

        let event = parse_line(r#"{"event": "PAY", "data": {"amount": 3}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, Event::with_data("PAY", json!({"amount": 3})));

        let bare = parse_line(r#"{"event": "PING"}"#).unwrap().unwrap();
        assert!(!bare.has_data());

        assert!(parse_line("{not json").is_err());
    }
}
