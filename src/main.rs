use anyhow::Result;
use clap::Parser;
use gmail_mcp_engine::cli::{self, Cli};
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "gmail_mcp_engine=debug,info"
    } else {
        "gmail_mcp_engine=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run(cli).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }

    Ok(())
}
