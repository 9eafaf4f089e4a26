use anyhow::Result;
use clap::Parser;
use reposync_transfer::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("reposync receiver starting...");

    Cli::parse().run().await
}
