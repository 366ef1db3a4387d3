//! Command execution.

use crate::Commands;
use arbor_core::{Chart, DispatchOutcome, Event, StateIdx};
use arbor_runtime::{Config, EventFilter, MachineHost, Watcher};
use colored::Colorize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl { .. } => unreachable!(),

        Commands::Validate { definition } => {
            let chart = load_chart(&definition)?;
            Ok(format!(
                "{} chart {} ({} states, checksum: {})",
                "Valid".green(),
                chart.id().cyan(),
                chart.len(),
                chart.checksum()
            ))
        }

        Commands::Inspect { definition, json } => {
            let chart = load_chart(&definition)?;
            if json {
                return Ok(format_json(&chart.to_json()?));
            }
            Ok(render_chart(&chart))
        }

        Commands::Run {
            definition,
            events,
            ctx,
            watch,
            settle_ms,
            config,
        } => {
            let chart = load_chart(&definition)?;
            let host = MachineHost::new(load_config(config)?);
            let chart = host.register_chart(chart);
            let context = ctx.as_deref().map(parse_json_arg).transpose()?.unwrap_or(Value::Null);

            // Subscribe before spawning so the start notifications are seen.
            let mut watcher = watch.then(|| host.subscribe_all(EventFilter::default()));

            let id = host.spawn_instance(None, chart.id(), context)?;
            print_pending(&mut watcher);

            let mut output = Vec::new();
            for arg in &events {
                let event = parse_event(arg)?;
                match host.dispatch(&id, event).await {
                    Ok(outcome) => output.push(format_outcome(&outcome)),
                    Err(e) => output.push(format!("{} {}: {}", arg.cyan(), "failed".red(), e)),
                }
                print_pending(&mut watcher);
            }

            if settle_ms > 0 {
                tokio::time::sleep(Duration::from_millis(settle_ms)).await;
                print_pending(&mut watcher);
            }

            let snapshot = host.snapshot(&id).await?;
            host.shutdown().await;
            print_pending(&mut watcher);

            output.push(format_json(&serde_json::to_value(&snapshot)?));
            Ok(output.join("\n"))
        }
    }
}

/// Loads a chart from a file path, `@file`, or inline JSON.
pub fn load_chart(arg: &str) -> Result<Chart, Box<dyn std::error::Error>> {
    let json = if arg.trim_start().starts_with('{') {
        serde_json::from_str(arg)?
    } else {
        let path = arg.strip_prefix('@').unwrap_or(arg);
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)?
    };
    Ok(Chart::from_json(&json)?)
}

/// Loads configuration from an explicit file, or defaults plus environment.
pub fn load_config(path: Option<PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let config = Config::from_file(&path)?;
            config.validate()?;
            Ok(config)
        }
        None => {
            let config = Config::from_env();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Parses a JSON argument (either inline JSON or @file.json).
pub fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Parses `NAME` or `NAME=<payload>`.
pub fn parse_event(arg: &str) -> Result<Event, Box<dyn std::error::Error>> {
    match arg.split_once('=') {
        Some((name, payload)) => Ok(Event::with_data(name.trim(), parse_json_arg(payload.trim())?)),
        None => Ok(Event::new(arg.trim())),
    }
}

/// One line per dispatch, followed by any diagnostics.
pub fn format_outcome(outcome: &DispatchOutcome) -> String {
    let status = if outcome.handled {
        "handled".green()
    } else {
        "ignored".yellow()
    };
    let mut line = format!(
        "{} {} [{}]",
        outcome.event.cyan(),
        status,
        outcome.configuration.join(" > ")
    );
    for diagnostic in &outcome.diagnostics {
        line.push_str(&format!(
            "\n  {} {} ({}): {}",
            "warning".yellow(),
            diagnostic.code,
            diagnostic.event,
            diagnostic.message
        ));
    }
    line
}

fn print_pending(watcher: &mut Option<Watcher>) {
    if let Some(watcher) = watcher {
        while let Some(event) = watcher.try_recv() {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        }
    }
}

/// Renders the state tree with transitions, then the chart's events and predicates.
pub fn render_chart(chart: &Chart) -> String {
    let mut output = format!(
        "{} ({} states, checksum: {})\n",
        format!("Chart {}", chart.id().cyan()).bold(),
        chart.len(),
        chart.checksum()
    );
    render_state(chart, Chart::ROOT, &mut output);

    let events: Vec<&str> = chart.events().into_iter().collect();
    output.push_str(&format!("\nEvents: {}", join_or_none(&events)));
    let predicates: Vec<&str> = chart.predicate_names().into_iter().collect();
    output.push_str(&format!("\nPredicates: {}", join_or_none(&predicates)));
    output
}

fn render_state(chart: &Chart, idx: StateIdx, output: &mut String) {
    let state = chart.state(idx);
    let indent = "  ".repeat(state.depth);

    let mut line = format!("{}{}", indent, state.id.yellow());
    if let Some(parent) = state.parent {
        if chart.state(parent).initial == Some(idx) {
            line.push_str(&format!(" {}", "(initial)".dimmed()));
        }
    }
    if let Some(ref invoke) = state.invoke {
        line.push_str(&format!(" invokes {} as {}", invoke.src.cyan(), invoke.id));
    }
    output.push_str(&line);
    output.push('\n');

    let detail = format!("{}  ", indent);
    if !state.entry.is_empty() {
        let actions: Vec<String> = state.entry.iter().map(|a| a.describe()).collect();
        output.push_str(&format!("{}entry: {}\n", detail, actions.join(", ")));
    }
    if !state.exit.is_empty() {
        let actions: Vec<String> = state.exit.iter().map(|a| a.describe()).collect();
        output.push_str(&format!("{}exit: {}\n", detail, actions.join(", ")));
    }
    for (event, transitions) in &state.transitions {
        for transition in transitions {
            let target = transition
                .target
                .map(|t| chart.state(t).id.clone())
                .unwrap_or_else(|| "(internal)".to_string());
            let mut line = format!("{}{} -> {}", detail, event.cyan(), target);
            if let Some(ref guard) = transition.guard {
                line.push_str(&format!(" if {}", guard));
            }
            if !transition.actions.is_empty() {
                let actions: Vec<String> =
                    transition.actions.iter().map(|a| a.describe()).collect();
                line.push_str(&format!(" / {}", actions.join(", ")));
            }
            output.push_str(&line);
            output.push('\n');
        }
    }

    for &child in &state.children {
        render_state(chart, child, output);
    }
}

fn join_or_none(items: &[&str]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const DOOR: &str = r#"{"id": "door", "initial": "closed",
        "states": {"closed": {"on": {"OPEN": "open"}}, "open": {"on": {"CLOSE": "closed"}}}}"#;

    #[test]
    fn test_load_config_validates_environment() {
        std::env::set_var("ARBOR_NOTIFICATION_CAPACITY", "0");
        let result = load_config(None);
        std::env::remove_var("ARBOR_NOTIFICATION_CAPACITY");
        assert!(result.is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host:\n  command_capacity: 0").unwrap();
        assert!(load_config(Some(file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_parse_event() {
        let event = parse_event("OPEN").unwrap();
        assert_eq!(event.name, "OPEN");
        assert!(!event.has_data());

        let event = parse_event(r#"PAY={"amount": 5}"#).unwrap();
        assert_eq!(event.name, "PAY");
        assert_eq!(event.data, json!({"amount": 5}));

        assert!(parse_event("PAY={oops").is_err());
    }

    #[test]
    fn test_load_chart_inline_and_file() {
        let inline = load_chart(DOOR).unwrap();
        assert_eq!(inline.id(), "door");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", DOOR).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let from_file = load_chart(&path).unwrap();
        let from_at = load_chart(&format!("@{}", path)).unwrap();
        assert_eq!(from_file.checksum(), inline.checksum());
        assert_eq!(from_at.checksum(), inline.checksum());

        assert!(load_chart("/nonexistent/chart.json").is_err());
    }

    #[test]
    fn test_render_chart() {
        colored::control::set_override(false);
        let chart = load_chart(DOOR).unwrap();
        let rendered = render_chart(&chart);
        assert!(rendered.contains("  closed (initial)"));
        assert!(rendered.contains("OPEN -> open"));
        assert!(rendered.contains("Events: CLOSE, OPEN"));
        assert!(rendered.contains("Predicates: (none)"));
    }
}
