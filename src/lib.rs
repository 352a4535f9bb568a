pub mod cli;
pub mod commands;
pub mod llm;
pub mod persistence;
pub mod platform;
pub mod speech;
pub mod state;
pub mod story;
pub mod vocab;

use anyhow::Context;
use clap::Parser;

pub fn run() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    let cli = cli::Cli::parse();
    tracing::debug!("Starting Lexitale v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(cli::dispatch(cli))
}
