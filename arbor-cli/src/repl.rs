//! Interactive REPL.

use crate::commands::{
    format_json, format_outcome, load_chart, load_config, parse_json_arg, render_chart,
};
use arbor_core::{Chart, Event};
use arbor_runtime::{EventFilter, MachineHost, Watcher};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help

  send <event> [payload]        Dispatch an event
  state                         Show the active configuration
  ctx                           Show the context
  events                        Events declared by the active states
  snapshot                      Show the full snapshot
  inspect                       Show the chart

  watch on|off                  Print notifications as they happen
  restart                       Stop the instance and start a fresh one

  quit, exit                    Exit the REPL
"#;

struct Session {
    host: MachineHost,
    chart: Arc<Chart>,
    context: Value,
    instance: String,
    watcher: Option<Watcher>,
}

pub async fn run(
    definition: &str,
    ctx: Option<&str>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "arbor CLI".bold().cyan());

    let chart = load_chart(definition)?;
    let host = MachineHost::new(load_config(config)?);
    let chart = host.register_chart(chart);
    let context = ctx.map(parse_json_arg).transpose()?.unwrap_or(Value::Null);
    let instance = host.spawn_instance(None, chart.id(), context.clone())?;
    println!("{} {} ({})", "Started".green(), chart.id().cyan(), instance);

    let mut session = Session {
        host,
        chart,
        context,
        instance,
        watcher: None,
    };

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".arbor_history"))
        .unwrap_or_else(|_| ".arbor_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", format!("{}>", session.chart.id()).cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&mut session, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    session.host.shutdown().await;
    print_notifications(&mut session.watcher);
    println!("{}", "Stopped.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    session: &mut Session,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let cmd = cmd.to_lowercase();
    let rest = rest.trim();

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "send" | "s" => {
            if rest.is_empty() {
                return Ok(Some("Usage: send <event> [payload_json]".to_string()));
            }
            let (name, payload) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let event = if payload.trim().is_empty() {
                Event::new(name)
            } else {
                Event::with_data(name, parse_json_arg(payload.trim())?)
            };

            let result = session.host.dispatch(&session.instance, event).await;
            print_notifications(&mut session.watcher);
            Ok(Some(format_outcome(&result?)))
        }

        "state" | "st" => {
            let snapshot = session.host.snapshot(&session.instance).await?;
            Ok(Some(format!(
                "{} [{}]",
                snapshot.status.to_string().yellow(),
                snapshot.configuration.join(" > ")
            )))
        }

        "ctx" | "context" => {
            let snapshot = session.host.snapshot(&session.instance).await?;
            Ok(Some(format_json(&snapshot.context)))
        }

        "events" | "e" => {
            let snapshot = session.host.snapshot(&session.instance).await?;
            let events: BTreeSet<&str> = snapshot
                .configuration
                .iter()
                .filter_map(|id| session.chart.lookup(id))
                .flat_map(|idx| session.chart.state(idx).transitions.keys())
                .map(String::as_str)
                .collect();
            if events.is_empty() {
                return Ok(Some("No events".yellow().to_string()));
            }
            Ok(Some(events.into_iter().collect::<Vec<_>>().join(", ")))
        }

        "snapshot" | "snap" => {
            let snapshot = session.host.snapshot(&session.instance).await?;
            Ok(Some(format_json(&serde_json::to_value(&snapshot)?)))
        }

        "inspect" | "i" => Ok(Some(render_chart(&session.chart))),

        "watch" | "w" => match rest {
            "on" | "" => {
                if session.watcher.is_none() {
                    session.watcher = Some(session.host.subscribe_instance(&session.instance)?);
                }
                Ok(Some(format!("{} notifications", "Watching".green())))
            }
            "off" => {
                if let Some(watcher) = session.watcher.take() {
                    session.host.unsubscribe(watcher.subscription_id());
                }
                Ok(Some("Stopped watching".dimmed().to_string()))
            }
            _ => Ok(Some("Usage: watch on|off".to_string())),
        },

        "restart" => {
            let stopped = session.host.stop(&session.instance).await;
            print_notifications(&mut session.watcher);
            if let Err(e) = stopped {
                println!("{}: {}", "Warning".yellow(), e);
            }

            let watching = session.watcher.take().is_some();
            if watching {
                session.watcher = Some(session.host.subscribe_all(EventFilter::default()));
            }
            session.instance =
                session
                    .host
                    .spawn_instance(None, session.chart.id(), session.context.clone())?;
            print_notifications(&mut session.watcher);
            if let Some(watcher) = session.watcher.take() {
                // Narrow to the new instance now that its start has been shown.
                session.host.unsubscribe(watcher.subscription_id());
                session.watcher = Some(session.host.subscribe_instance(&session.instance)?);
            }

            Ok(Some(format!("{} {}", "Restarted".green(), session.instance)))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}

fn print_notifications(watcher: &mut Option<Watcher>) {
    if let Some(watcher) = watcher {
        while let Some(event) = watcher.try_recv() {
            let label = event.notification.kind().magenta();
            match serde_json::to_string(&event.notification) {
                Ok(json) => println!("  {} {}", label, json.dimmed()),
                Err(_) => println!("  {}", label),
            }
        }
    }
}
