//! termin-node — the appointment-broker server binary.
//!
//! Startup sequence:
//!   1. Load the settings file (keys, HMAC secret, code policy)
//!   2. Open the store (persistent when --data-dir is given)
//!   3. Build the broker and start the JSON-RPC 2.0 server
//!   4. Run until ctrl-c, then flush the store

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use termin_engine::{Broker, Settings};
use termin_rpc::RpcServer;
use termin_store::{Database, MemStore};

#[derive(Parser, Debug)]
#[command(
    name = "termin-node",
    version,
    about = "Privacy-preserving vaccination-appointment broker"
)]
struct Args {
    /// Path to the settings JSON (keys, secret, code policy).
    #[arg(long)]
    settings: PathBuf,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:22222")]
    rpc_addr: SocketAddr,

    /// Directory for the persistent store. Omit for a purely in-memory
    /// server (all state is lost on restart).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,termin=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("termin node starting");

    // ── Settings ──────────────────────────────────────────────────────────────
    let raw = std::fs::read_to_string(&args.settings)
        .with_context(|| format!("reading settings file {}", args.settings.display()))?;
    let settings: Settings = serde_json::from_str(&raw).context("parsing settings file")?;

    // ── Store ─────────────────────────────────────────────────────────────────
    let store = match &args.data_dir {
        Some(dir) => {
            let dir = expand_tilde(dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating data dir {}", dir.display()))?;
            info!(path = %dir.display(), "opening persistent store");
            MemStore::open(&dir).context("opening store")?
        }
        None => {
            info!("no data dir given; running with an in-memory store");
            MemStore::new()
        }
    };
    let db = Arc::new(store);

    // ── Broker + RPC server ───────────────────────────────────────────────────
    let broker = Arc::new(Broker::new(db.clone(), &settings).context("building broker")?);
    let handle = RpcServer::new(broker)
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    handle.stop().ok();
    handle.stopped().await;
    db.flush().ok();
    Ok(())
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
