//! arec CLI entrypoint

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use arec::cli::Cli;
use arec::config::paths::Layout;
use arec::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // The daemon also appends to <home>/arec.log
    let file_layer = if cli.command.is_daemon() {
        let layout = Layout::from_config(&config);
        std::fs::create_dir_all(&layout.home)
            .with_context(|| format!("Cannot create directory: {}", layout.home.display()))?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(layout.log_file())
            .with_context(|| format!("Cannot open log file: {}", layout.log_file().display()))?;

        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(log_file)),
        )
    } else {
        None
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    cli.execute(config).await
}
