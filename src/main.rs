use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use reqpilot::AppContext;
use reqpilot::cli::{self, commands};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let command = args.command.clone();
    let config = args.into_config()?;

    let level = if config.verbose { "reqpilot=debug" } else { "reqpilot=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    let ctx = AppContext::new(config).await?;
    commands::run(&ctx, command).await
}
