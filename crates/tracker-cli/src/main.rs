mod cli;
mod context;
mod handlers;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use context::CliContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(log_path) = std::env::var("TRACKER_DEBUG_LOG") {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_max_level(tracing::Level::DEBUG)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .init();
    } else {
        // stdout carries the JSON responses
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(tracing::Level::WARN)
            .init();
    }

    let cli = Cli::parse();
    let config = CliContext::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => output::output_success(&config)?,
        Commands::Timers(timers_cmd) => {
            let store_dir = cli
                .store
                .ok_or_else(|| anyhow::anyhow!("--store is required for timer operations"))?;
            let ctx = CliContext::open(&store_dir, config);
            handlers::timers::handle(&ctx, timers_cmd.action).await?;
        }
    }

    Ok(())
}
