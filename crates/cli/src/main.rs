//! Inference operator CLI
//!
//! Validates API manifests against the live cluster and model storage, and
//! shows the capacity new APIs are admitted against.

mod commands;
mod output;
mod project;
mod s3;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{capacity, validate};
use operator_lib::OperatorConfig;
use tracing_subscriber::EnvFilter;

/// Inference operator CLI
#[derive(Parser)]
#[command(name = "infctl")]
#[command(author, version, about = "CLI for the inference operator", long_about = None)]
pub struct Cli {
    /// Operator configuration file (falls back to OPERATOR_CONFIG)
    #[arg(long, short)]
    pub config: Option<String>,

    /// Namespace APIs are deployed in (overrides the configured namespace)
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate an API manifest and print the accepted APIs
    Validate(validate::ValidateArgs),

    /// Show per-node capacity and the endpoints already served
    Capacity,
}

fn load_config(cli: &Cli) -> Result<OperatorConfig> {
    let mut config = match &cli.config {
        Some(path) => OperatorConfig::load_from(path),
        None => OperatorConfig::load(),
    }
    .context("Failed to load operator configuration")?;

    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let kubeconfig = cli.kubeconfig.as_deref();

    match cli.command {
        Commands::Validate(args) => validate::run(args, &config, kubeconfig, cli.format).await,
        Commands::Capacity => capacity::run(&config, kubeconfig, cli.format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
