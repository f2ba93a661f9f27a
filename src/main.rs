mod app;
mod config;
mod exchange;
mod feed;
mod grouping;
mod perf;
mod protocol;
mod state;
mod tui;
mod ui;

use std::{fs::OpenOptions, path::Path, sync::Mutex};

use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let config = config::Config::parse();
    // The browser owns the terminal, so stderr logging stays quiet there
    // unless RUST_LOG or --log-file asks for more.
    let default_filter = if config.print || config.log_file.is_some() {
        "exlens=info"
    } else {
        "exlens=warn"
    };
    init_tracing(default_filter, config.log_file.as_deref())?;

    if config.print {
        return app::run_report(config).await;
    }

    let app = app::ExlensApp::bootstrap(config).await?;
    app.run().await
}

fn init_tracing(default_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| eyre!("failed to open log file {}: {err}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    }
    .map_err(|err| eyre!(err))?;

    Ok(())
}
