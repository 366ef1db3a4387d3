//! arbor-cli - Command-line interface for arbor
//!
//! Validates, inspects and runs chart definitions, one-shot or from a REPL.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor-cli")]
#[command(about = "Command-line interface for arbor statecharts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a definition and print its checksum
    Validate {
        /// Definition file (or inline JSON)
        definition: String,
    },

    /// Print the state tree, events and predicates of a definition
    Inspect {
        /// Definition file (or inline JSON)
        definition: String,

        /// Print the normalized definition as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start an instance, send events and print the outcome
    Run {
        /// Definition file (or inline JSON)
        definition: String,

        /// Events to send, as NAME or NAME=<payload json | @file.json>
        events: Vec<String>,

        /// Initial context JSON (or @file.json)
        #[arg(short, long)]
        ctx: Option<String>,

        /// Print every notification as a JSON line
        #[arg(short, long)]
        watch: bool,

        /// Time to let invoked services finish after the last event
        #[arg(long, default_value = "0")]
        settle_ms: u64,

        /// Configuration file (defaults to ARBOR_CONFIG)
        #[arg(long, env = "ARBOR_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Start an interactive session with one instance
    Repl {
        /// Definition file (or inline JSON)
        definition: String,

        /// Initial context JSON (or @file.json)
        #[arg(short, long)]
        ctx: Option<String>,

        /// Configuration file (defaults to ARBOR_CONFIG)
        #[arg(long, env = "ARBOR_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Repl {
            definition,
            ctx,
            config,
        } => {
            repl::run(&definition, ctx.as_deref(), config).await?;
        }
        cmd => match commands::execute(cmd).await {
            Ok(output) => {
                println!("{}", output);
            }
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
