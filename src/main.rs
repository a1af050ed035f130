//! Review dashboard server for photo-submission results.
//!
//! Serves the browser dashboard and JSON API over an S3-compatible bucket of
//! JSON+JPEG submission pairs, with a file-backed study-configuration store
//! alongside. One process, one port; state lives in the object store and the
//! data directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use capture_review::config::Config;
use capture_review::storage::S3ObjectStore;
use capture_review::studies::StudyStore;
use capture_review::viewer::pipeline::PreloadConfig;
use capture_review::viewer::server::{run_server, AppState, ServerConfig};

/// Review dashboard for photo-submission results
#[derive(Parser, Debug)]
#[command(name = "capture-review")]
#[command(about = "Serve the submission review dashboard over an object-storage bucket")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8060", env = "PORT")]
    port: u16,

    /// Settings file (object-store credentials, capture client base URL)
    #[arg(short, long, env = "CAPTURE_REVIEW_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for server-side state (study configurations)
    #[arg(short, long, default_value = "./data", env = "DATA_DIR")]
    data_dir: PathBuf,

    /// Concurrent payload fetches per preload batch
    #[arg(long, default_value = "20")]
    batch_width: usize,

    /// Per-fetch timeout in seconds during preload
    #[arg(long, default_value = "15")]
    fetch_timeout_secs: u64,

    /// Base URL of the mobile capture client (overrides the settings file)
    #[arg(long, env = "CAPTURE_BASE_URL")]
    capture_base_url: Option<String>,

    /// Open the dashboard in a browser on startup
    #[arg(long, default_value = "false")]
    open_browser: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing - RUST_LOG takes precedence, fallback to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::info!(
        port = args.port,
        data_dir = %args.data_dir.display(),
        batch_width = args.batch_width,
        fetch_timeout_secs = args.fetch_timeout_secs,
        "Starting capture-review"
    );

    run(args).await
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load_or_default(args.config.as_deref())?;

    let store = S3ObjectStore::new(&config.object_store)
        .await
        .context("Failed to initialize object store client")?;

    let studies = StudyStore::new(args.data_dir.join("studies"))
        .context("Failed to initialize study store")?;

    let preload = PreloadConfig {
        batch_width: args.batch_width.max(1),
        fetch_timeout: Duration::from_secs(args.fetch_timeout_secs.max(1)),
    };

    let capture_base = args
        .capture_base_url
        .or(config.server.capture_base_url);

    let state = Arc::new(AppState::new(
        Arc::new(store),
        studies,
        preload,
        capture_base,
    ));

    // Shutdown coordination: OS signals flip the watch channel, the server
    // drains gracefully.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
        let _ = shutdown_tx.send(true);
    });

    run_server(
        state,
        ServerConfig {
            port: args.port,
            open_browser: args.open_browser,
        },
        shutdown_rx,
    )
    .await
}
