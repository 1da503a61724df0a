mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "relay",
    about = "Deterministic action dispatch: run scenario files and inspect their traces",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push every transaction in a scenario and compare against expectations
    Run {
        /// Scenario YAML file
        #[arg(env = "RELAY_SCENARIO")]
        scenario: PathBuf,

        /// Report only this transaction (earlier ones still run)
        #[arg(long)]
        only: Option<String>,

        /// Print each executed work item
        #[arg(long)]
        trace: bool,
    },

    /// Validate a scenario without running it
    Check {
        #[arg(env = "RELAY_SCENARIO")]
        scenario: PathBuf,
    },

    /// List the handlers a scenario registers
    Registry {
        #[arg(env = "RELAY_SCENARIO")]
        scenario: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run {
            scenario,
            only,
            trace,
        } => cmd::run::run(&scenario, only.as_deref(), trace, cli.json),
        Commands::Check { scenario } => cmd::check::run(&scenario, cli.json),
        Commands::Registry { scenario } => cmd::registry::run(&scenario, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
