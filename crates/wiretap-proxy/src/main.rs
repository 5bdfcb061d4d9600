//! Wiretap command line entry point.
//!
//! Usage:
//!   wiretap --mode capture --dir ./snapshots
//!   wiretap --mode replay --dir ./snapshots --addr 127.0.0.1:9091

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wiretap_proxy::config::{Config, Mode};
use wiretap_proxy::{ArchiveStore, CertAuthority, Server};

#[derive(Parser, Debug)]
#[command(name = "wiretap")]
#[command(author, version, about = "HTTP(S) proxy that captures and replays traffic")]
struct Args {
    /// Capture traffic to archives or replay archived traffic
    #[arg(short, long, value_enum, env = "WIRETAP_MODE")]
    mode: Option<Mode>,

    /// Snapshot directory ('-' creates a temporary directory)
    #[arg(short, long, env = "WIRETAP_DIR")]
    dir: Option<String>,

    /// Listen address
    #[arg(short, long, env = "WIRETAP_ADDR")]
    addr: Option<String>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the root CA certificate and key
    #[arg(long, env = "WIRETAP_CA_DIR")]
    ca_dir: Option<PathBuf>,

    /// Log output format: text (default), json
    #[arg(long, default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args.log_format);

    if let Err(e) = run(args).await {
        eprintln!("wiretap: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> Result<Config, anyhow::Error> {
    let mut config = match args.config {
        Some(ref path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(ref dir) = args.dir {
        config.snapshots.dir = dir.clone();
    }
    if let Some(ref addr) = args.addr {
        config.listen.addr = addr.clone();
    }
    if let Some(ref ca_dir) = args.ca_dir {
        config.ca.dir = Some(ca_dir.clone());
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> Result<(), anyhow::Error> {
    let config = load_config(&args)?;

    let ca_dir = config.ca.resolve_dir();
    let ca = CertAuthority::load_or_generate(&ca_dir)
        .with_context(|| format!("failed to load CA from {}", ca_dir.display()))?;
    info!("Using CA from {}", ca_dir.display());

    let snapshot_dir = config.snapshots.prepare()?;
    info!("Snapshot directory: {}", snapshot_dir.display());

    let store = Arc::new(ArchiveStore::new(&snapshot_dir));
    let mut server = Server::from_config(&config, Arc::new(ca), store);

    match config.mode {
        Mode::Capture => server.start_in_capture_mode().await?,
        Mode::Replay => {
            server.load_snapshots(&snapshot_dir)?;
            server.start_in_replay_mode().await?
        }
    }

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
        }
        shutdown.cancel();
    });

    server.serve().await
}
