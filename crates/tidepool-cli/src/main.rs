use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod scenario;

#[derive(Parser)]
#[command(
    name = "tidepool",
    about = "Tidepool: stabilized pool autoscaling",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a policy file and print the resolved configuration
    Check {
        /// Path to the policy TOML file
        #[arg(short, long)]
        policy: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Replay a load scenario against an in-memory pool.
    ///
    /// The scenario file holds a [policy] table, the initial pool size and a
    /// list of [[step]] entries, each offset from the start of the run.
    Simulate {
        /// Path to the scenario TOML file
        #[arg(short, long)]
        scenario: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tidepool=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { policy, format } => commands::check::check(&policy, &format),
        Commands::Simulate { scenario, format } => {
            commands::simulate::simulate(&scenario, &format).await
        }
    }
}
