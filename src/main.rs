use anyhow::Result;
use clap::Parser;
use postbox::cli::{Cli, CliHandler};
use tracing::Level;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries traces and printed ids
    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let handler = CliHandler::new(cli.config, cli.dry_run).await?;
    handler.handle_command(cli.command).await?;

    Ok(())
}
