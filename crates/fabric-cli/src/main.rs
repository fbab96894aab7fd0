// Fabric CLI
//
// Design Decision: clap derive for ergonomic argument parsing.
// Design Decision: text/json output for scripting (no HTTP client here —
//   the CLI embeds the bus, ledger, and orchestrator in-process).
// Design Decision: tracing + EnvFilter for structured logs, same as every
//   other fabric crate.

mod commands;
mod output;
mod runtime;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fabric")]
#[command(about = "Drive the event bus, trust ledger, and workflow orchestrator")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish a single envelope to the bus
    Publish {
        /// Source component, e.g. "vulnerability"
        source: String,
        /// Event type, e.g. "vulnerability.discovered"
        event_type: String,
        /// JSON payload matching the (source, event_type) schema
        #[arg(long, default_value = "{}")]
        data: String,
    },

    /// Run a canonical workflow
    Workflow {
        #[command(subcommand)]
        command: commands::workflow::WorkflowCommand,
    },

    /// Show an entity's trust balance
    Ledger {
        /// Entity id
        entity_id: String,
    },

    /// Run a short end-to-end scenario against an in-process runtime
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);
    let runtime = runtime::build();

    match cli.command {
        Commands::Publish { source, event_type, data } => {
            commands::publish::run(&runtime.bus, output_format, &source, &event_type, &data).await
        }
        Commands::Workflow { command } => {
            commands::workflow::run(command, &runtime.orchestrator, output_format).await
        }
        Commands::Ledger { entity_id } => commands::ledger::run(&runtime.ledger, output_format, &entity_id).await,
        Commands::Demo => commands::demo::run(&runtime).await,
    }
}
