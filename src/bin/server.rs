//! HearthKV Server Binary
//!
//! Starts the UNIX socket server for HearthKV.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use hearthkv::{Config, Server, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// HearthKV Server
#[derive(Parser, Debug)]
#[command(name = "hearthkv-server")]
#[command(about = "Embedded ordered key-value server over a UNIX domain socket")]
#[command(version)]
struct Args {
    /// Storage engine directory
    #[arg(short, long)]
    db_path: PathBuf,

    /// Filesystem path for the listening UNIX socket
    #[arg(short, long)]
    socket_path: PathBuf,

    /// Engine write buffer size in MiB
    #[arg(long, default_value = "4096")]
    write_buffer_mb: usize,

    /// Engine open-file ceiling
    #[arg(long, default_value = "500")]
    max_open_files: i32,

    /// Worker threads (0 = one per CPU)
    #[arg(short, long, default_value = "0")]
    workers: usize,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1024")]
    max_connections: usize,

    /// Per-call I/O timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hearthkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("HearthKV Server v{}", hearthkv::VERSION);
    tracing::info!("database directory: {}", args.db_path.display());
    tracing::info!("socket path: {}", args.socket_path.display());

    // Build config from args
    let config = match Config::builder()
        .db_path(&args.db_path)
        .socket_path(&args.socket_path)
        .write_buffer_size(args.write_buffer_mb << 20)
        .max_open_files(args.max_open_files)
        .worker_threads(args.workers)
        .max_connections(args.max_connections)
        .io_timeout_ms(args.timeout_ms)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Open the storage engine
    let store = match Store::open(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("failed to open storage engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("storage engine initialized");

    let mut server = Server::new(config, store);

    // SIGINT/SIGTERM flip the shared shutdown flag; the accept loop and
    // every in-flight readiness wait observe it.
    let shutdown = server.shutdown_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Relaxed);
    }) {
        tracing::warn!("failed to install signal handler: {}", e);
    }

    if let Err(e) = server.run() {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("server stopped");
}
