use assessment_engine::config::Config;
use assessment_engine::http::HttpServer;
use assessment_engine::{Catalog, Engine};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Guided decision-tree assessment service
#[derive(Parser, Debug)]
#[command(name = "assessment-engine", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Decision-tree catalog JSON (overrides config)
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(catalog) = args.catalog {
        config.catalog.path = catalog;
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(config.tracing_level())
        .init();

    info!(
        catalog = %config.catalog.path.display(),
        addr = %config.server.socket_addr(),
        "assessment engine starting"
    );

    let catalog = Catalog::load_or_empty(&config.catalog.path)?;
    let engine = Arc::new(Engine::in_memory(catalog));

    HttpServer::new(config.server, engine).start().await?;
    Ok(())
}
