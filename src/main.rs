use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod comparison;
mod config;
mod generation;
mod langfuse;
mod models;
mod output;
mod providers;
mod runner;
mod scoring;
mod setup;

use crate::config::ExperimentConfig;
use crate::generation::MistralClient;
use crate::langfuse::{LangfuseClient, LangfuseConfig};
use crate::output::OutputFormat;
use crate::runner::Runner;

/// Prompt A/B test - run a shared dataset through two prompt versions and compare scores
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to an optional TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain", global = true)]
    output: OutputFormat,

    /// Verbose output - log every request and resolved prompt
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the experiment and print the comparison (default)
    Run,
    /// Create the two prompt versions and the evaluation dataset
    Setup,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("prompt_ab_test=debug,info")
        } else {
            EnvFilter::new("prompt_ab_test=info,warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let dotenv = config::load_dotenv();
    init_tracing(args.verbose);
    match dotenv {
        Ok(Some(path)) => debug!(path = %path.display(), "loaded environment file"),
        Ok(None) => {}
        Err(err) => warn!(error = %err, "failed to load .env file"),
    }

    let config = ExperimentConfig::load(args.config.as_deref())?;
    let langfuse = Arc::new(LangfuseClient::new(LangfuseConfig::from_config(&config)?)?);

    match args.command.unwrap_or(Command::Run) {
        Command::Setup => {
            setup::seed(&langfuse, &config).await?;
        }
        Command::Run => {
            let generator = Arc::new(MistralClient::from_config(&config)?);
            let runner = Runner::new(
                config,
                langfuse.clone(),
                langfuse.clone(),
                generator,
                langfuse,
            );

            let report = runner.run_experiment().await?;
            output::print_report(&report, args.output);
        }
    }

    Ok(())
}
