//! Command line client.
//!
//! Usage:
//!   client [--server ADDR] upload FILE [DEST]
//!   client [--server ADDR] download NAME [--out DIR]
//!   client [--server ADDR] remove NAME
//!   client [--server ADDR] archive EXT
//!   client [--server ADDR] list PATH
//!   client [--server ADDR] shell

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use extshard::client::Client;
use extshard::config::DISPATCHER_PORT;

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "Talks to the extension-sharded file store")]
struct Args {
    /// Dispatcher address
    #[arg(short, long, default_value_t = format!("127.0.0.1:{}", DISPATCHER_PORT))]
    server: String,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug, Clone)]
enum Action {
    /// Upload a local file into DEST on the server
    Upload {
        file: PathBuf,
        #[arg(default_value = "")]
        dest: String,
    },
    /// Download a stored file into the current directory
    Download {
        name: String,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Delete a stored file
    Remove { name: String },
    /// Build the tar archive for one extension
    Archive { extension: String },
    /// List a directory across all stores
    List { path: String },
    /// Read commands from stdin, one per line, over a single session
    Shell,
}

impl Action {
    fn from_line(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next()?;
        let first = words.next();
        let second = words.next();
        let action = match (verb, first) {
            ("upload" | "ufile", Some(file)) => Action::Upload {
                file: PathBuf::from(file),
                dest: second.unwrap_or("").to_string(),
            },
            ("download" | "dfile", Some(name)) => Action::Download {
                name: name.to_string(),
                out: PathBuf::from("."),
            },
            ("remove" | "rmfile", Some(name)) => Action::Remove {
                name: name.to_string(),
            },
            ("archive" | "dtar", Some(extension)) => Action::Archive {
                extension: extension.to_string(),
            },
            ("list" | "display", Some(path)) => Action::List {
                path: path.to_string(),
            },
            _ => return None,
        };
        Some(action)
    }
}

async fn run(client: &mut Client, action: Action) -> Result<()> {
    let status = match action {
        Action::Upload { file, dest } => client.upload_file(&file, &dest).await?,
        Action::Download { name, out } => {
            let (path, status) = client.download_to(&name, &out).await?;
            if let Some(path) = path {
                tracing::info!(path = %path.display(), "saved");
            }
            status
        }
        Action::Remove { name } => client.remove(&name).await?,
        Action::Archive { extension } => client.archive(&extension).await?,
        Action::List { path } => client.list(&path).await?,
        Action::Shell => return Ok(()),
    };
    print!("{}", status);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut client = Client::connect(&args.server).await?;

    if !matches!(args.command, Action::Shell) {
        return run(&mut client, args.command).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        match Action::from_line(line) {
            Some(action) => {
                if let Err(e) = run(&mut client, action).await {
                    eprintln!("error: {:#}", e);
                }
            }
            None => eprintln!("usage: upload FILE [DEST] | download NAME | remove NAME | archive EXT | list PATH"),
        }
    }
    Ok(())
}
