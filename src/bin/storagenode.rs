//! Storage node binary: owns one extension and serves the dispatcher.
//!
//! Usage:
//!   storagenode --extension .pdf [--config FILE] [--listen ADDR] [--root DIR]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use extshard::config::NodeConfig;
use extshard::node::StorageNode;
use extshard::server;

#[derive(Parser, Debug)]
#[command(name = "storagenode")]
#[command(about = "Stores the files of a single extension")]
struct Args {
    /// Extension this node owns, e.g. ".pdf"
    #[arg(short, long)]
    extension: Option<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to accept the dispatcher on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Root directory for stored files
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = match (&args.config, &args.extension) {
        (Some(path), _) => NodeConfig::load(path)?,
        (None, Some(extension)) => NodeConfig::for_extension(extension),
        (None, None) => bail!("either --extension or --config is required"),
    };
    if let Some(extension) = args.extension {
        config.extension = extension;
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(root) = args.root {
        config.root = root;
    }
    config.validate()?;

    tokio::fs::create_dir_all(&config.root)
        .await
        .with_context(|| format!("cannot create root {}", config.root.display()))?;

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("cannot bind {}", config.listen))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        root = %config.root.display(),
        extension = %config.extension,
        "storage node listening"
    );

    let node = Arc::new(StorageNode::from_config(&config));
    server::run_node(listener, node).await;
    Ok(())
}
