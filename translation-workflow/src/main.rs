use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use translation_workflow::cli::{self, Args};
use translation_workflow::config::ProtocolConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ProtocolConfig::load(args.config.as_deref()).context("Failed to load config")?;

    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    cli::run(args, config).await
}
