use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::net::TcpListener;

use mailcatch_kernel::buffer::VolatileBuffer;
use mailcatch_kernel::collector::Collector;
use mailcatch_kernel::config::{self, DrainConfig, ServerConfig, StorageMode};
use mailcatch_kernel::drain::DrainClient;
use mailcatch_kernel::http::{self, AppState};
use mailcatch_kernel::log::{SerialWriter, StorageBackend};
use mailcatch_kernel::snapshot::SnapshotWriter;

/// Mailcatch address capture service
#[derive(Parser, Debug)]
#[command(name = "mailcatch")]
#[command(about = "Capture submitted addresses and persist them to snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collector HTTP server
    Serve(ServeArgs),

    /// Drain the collector buffer into a new snapshot
    Drain(DrainArgs),

    /// Print the snapshot chain
    Snapshots(SnapshotsArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Path to server config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// `direct` (append to log file) or `buffered` (hold until drained)
    #[arg(long, env = "MAILCATCH_MODE")]
    mode: Option<StorageMode>,

    /// Shared secret the drain job must present
    #[arg(long, env = "SCHEDULER_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Log file used in direct mode
    #[arg(long, env = "MAILCATCH_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DrainArgs {
    /// Path to drain config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Collector base URL
    #[arg(long, env = "MAILCATCH_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, env = "SCHEDULER_SECRET", hide_env_values = true)]
    secret: Option<String>,

    #[arg(long, env = "MAILCATCH_BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Keep draining every N seconds instead of once
    #[arg(long, value_name = "SECONDS")]
    every: Option<u64>,
}

#[derive(Args, Debug)]
struct SnapshotsArgs {
    #[arg(long, env = "MAILCATCH_BACKUP_DIR", default_value = config::DEFAULT_BACKUP_DIR)]
    backup_dir: PathBuf,
}

/// One line of `snapshots` output
#[derive(Debug, Serialize)]
struct SnapshotLine {
    name: String,
    total_count: usize,
    newly_added_count: usize,
    previous_snapshot_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailcatch=info,mailcatch_kernel=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Drain(args) => drain(args).await,
        Command::Snapshots(args) => snapshots(args),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    // ----------------------------
    // Load config
    // ----------------------------
    let mut config = match &args.config {
        Some(path) => config::load_json::<ServerConfig>(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if args.secret.is_some() {
        config.secret = args.secret;
    }
    if let Some(log_file) = args.log_file {
        config.log_file = log_file;
    }
    config.validate()?;

    // ----------------------------
    // Storage backend
    // ----------------------------
    let backend = match config.mode {
        StorageMode::Direct => {
            let writer = SerialWriter::new(&config.log_file);
            tracing::info!(log_file = %writer.path().display(), "appending to log file");
            StorageBackend::Direct(Arc::new(writer))
        }
        StorageMode::Buffered => StorageBackend::Buffered(Arc::new(VolatileBuffer::new())),
    };
    let buffer = backend.buffer().cloned();
    let state = AppState::new(Collector::new(backend), config.secret.clone());

    // ----------------------------
    // Serve
    // ----------------------------
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, mode = %config.mode, "collector listening");

    http::serve(listener, state, shutdown_signal())
        .await
        .context("http server failed")?;

    if let Some(buffer) = buffer.filter(|b| !b.is_empty()) {
        tracing::warn!(
            lost = buffer.len(),
            "shutting down with undrained submissions in memory"
        );
    }

    Ok(())
}

async fn drain(args: DrainArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => config::load_json::<DrainConfig>(path)?,
        None => DrainConfig::default(),
    };
    if args.endpoint.is_some() {
        config.endpoint = args.endpoint;
    }
    if args.secret.is_some() {
        config.secret = args.secret;
    }
    if let Some(dir) = args.backup_dir {
        config.backup_dir = dir;
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }
    if args.every.is_some() {
        config.interval_secs = args.every;
    }

    let client = DrainClient::from_config(&config)?;

    match config.interval() {
        Some(period) => {
            tracing::info!(
                every_secs = period.as_secs(),
                backup_dir = %config.backup_dir.display(),
                "starting drain loop"
            );
            client.run_every(period, shutdown_signal()).await;
        }
        None => {
            let summary = client.run_once().await?;
            match summary.snapshot {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => tracing::info!("nothing to drain"),
            }
        }
    }

    Ok(())
}

fn snapshots(args: SnapshotsArgs) -> Result<()> {
    let writer = SnapshotWriter::new(&args.backup_dir);

    let mut lines = Vec::new();
    for name in writer.list()? {
        let snapshot = writer
            .load(&name)
            .with_context(|| format!("failed to load snapshot {name}"))?;
        lines.push(SnapshotLine {
            name,
            total_count: snapshot.total_count,
            newly_added_count: snapshot.metadata.newly_added_count,
            previous_snapshot_name: snapshot.metadata.previous_snapshot_name,
        });
    }

    println!("{}", serde_json::to_string_pretty(&lines)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
