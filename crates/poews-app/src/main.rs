//! poews relay - Entry Point

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Relay trade whispers from the game log to WebSocket clients
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via POEWS_CONFIG env var)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file to watch (overrides watcher.file_path)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Listen address (overrides server.listen_addr)
    #[arg(short, long)]
    addr: Option<String>,

    /// Do not broadcast lines typed on stdin
    #[arg(long)]
    no_stdin: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    poews_telemetry::init_logging()?;
    poews_telemetry::Metrics::init();

    info!("Starting poews v{}", env!("CARGO_PKG_VERSION"));

    let mut config = poews_app::AppConfig::load(args.config.as_deref())?;
    if let Some(file) = args.file {
        config.watcher.file_path = Some(file);
    }
    if let Some(addr) = args.addr {
        config.server.listen_addr = addr;
    }
    if args.no_stdin {
        config.input.stdin = false;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        file_path = ?config.watcher.file_path,
        "Configuration loaded"
    );

    let app = poews_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
