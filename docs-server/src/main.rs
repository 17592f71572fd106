use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use docserve_server::{DocumentService, ServiceConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docserve")]
#[command(about = "Serve documentation from markdown directories with live refresh")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Documentation directory; repeat to add more. Replaces configured directories.
    #[arg(long = "docs-dir", value_name = "DIR")]
    docs_dirs: Vec<PathBuf>,

    /// Do not watch the directories for changes
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if !cli.docs_dirs.is_empty() {
        config.docs_dirs = cli.docs_dirs;
    }
    if cli.no_watch {
        config.watch = false;
    }
    config.validate()?;

    let service = DocumentService::new(config).await?;
    service.start().await.context("starting document service")?;

    let health = service.health().await;
    info!(
        "Serving {} documents (health: {})",
        health.cache.entries, health.overall
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    let health = service.health().await;
    info!("Final health: {}", serde_json::to_string(&health)?);
    service.shutdown().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
