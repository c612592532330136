mod checkpoint;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "optrack")]
#[command(about = "Consolidate extracted opinions into canonical opinions, chains and journeys")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every incomplete pipeline stage over an extracted-candidates file
    Run {
        /// JSON object mapping source unit id to its candidates
        #[arg(long)]
        input: PathBuf,
        /// Skip the oracle and decide borderline pairs heuristically
        #[arg(long)]
        no_oracle: bool,
        /// Discard checkpoint progress and artifacts before running
        #[arg(long)]
        fresh: bool,
    },
    /// Show checkpoint progress
    Progress,
    /// Discard checkpoint progress, cached oracle responses and artifacts
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = optrack_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Run {
            input,
            no_oracle,
            fresh,
        }) => run::run_pipeline(&config, &input, no_oracle, fresh).await?,
        Some(Commands::Progress) => checkpoint::run_progress(&config)?,
        Some(Commands::Reset) => checkpoint::run_reset(&config)?,
        None => println!("optrack: use `optrack run --input <file>`, `progress` or `reset`"),
    }

    Ok(())
}
