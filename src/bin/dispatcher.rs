//! Dispatcher binary: the only server clients talk to.
//!
//! Usage:
//!   dispatcher [--config FILE] [--listen ADDR] [--root DIR] [--status-listen ADDR]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use extshard::config::DispatcherConfig;
use extshard::dispatcher::Dispatcher;
use extshard::{server, status};

#[derive(Parser, Debug)]
#[command(name = "dispatcher")]
#[command(about = "Routes files to storage nodes by extension")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to accept clients on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Root directory for files of the local extension
    #[arg(long)]
    root: Option<PathBuf>,

    /// Address of the HTTP status API
    #[arg(long)]
    status_listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => DispatcherConfig::load(path)?,
        None => DispatcherConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(root) = args.root {
        config.root = root;
    }
    if args.status_listen.is_some() {
        config.status_listen = args.status_listen;
    }
    config.validate()?;

    tokio::fs::create_dir_all(&config.root)
        .await
        .with_context(|| format!("cannot create root {}", config.root.display()))?;

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("cannot bind {}", config.listen))?;
    tracing::info!(
        addr = %config.listen,
        root = %config.root.display(),
        local_extension = %config.local_extension,
        nodes = config.nodes.len(),
        "dispatcher listening"
    );

    let dispatcher = Arc::new(Dispatcher::from_config(&config));
    let accept = tokio::spawn(server::run_dispatcher(listener, Arc::clone(&dispatcher)));

    match config.status_listen {
        Some(addr) => status::run_status_server(dispatcher, addr).await?,
        None => accept.await?,
    }
    Ok(())
}
