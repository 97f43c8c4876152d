//! Sangha Progress Daemon
//!
//! Serves the progress API behind the app gateway.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! sangha-progress
//!
//! # Custom config and port
//! sangha-progress --config /path/to/config.toml --http-port 8096
//!
//! # Load (or replace) the content graph and card catalogue at startup
//! sangha-progress --seed demos/seed_content.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sangha_progress::{CardRetryWorker, Config, ContentImport, HttpServer, ProgressDb, Services};
use sangha_progress::services::spawn_logging_listener;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sangha-progress")]
#[command(about = "Progress and unlock engine for the Sangha learning app")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "SANGHA_PROGRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "SANGHA_PROGRESS_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "SANGHA_PROGRESS_HTTP_PORT")]
    http_port: Option<u16>,

    /// Content document (worlds, chapters, lessons, cards) to import at startup
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Log filter directive, e.g. `sangha_progress=debug`
    #[arg(long, env = "SANGHA_PROGRESS_LOG", default_value = "sangha_progress=info")]
    log_level: String,
}

fn load_seed(path: &PathBuf) -> anyhow::Result<ContentImport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed {}", path.display()))?;
    ContentImport::from_json(&raw).with_context(|| format!("parsing seed {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(args.log_level.parse()?))
        .init();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    config.validate()?;

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        "Starting sangha-progress"
    );

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(ProgressDb::open(
        &config.database_path(),
        config.pool_size,
        config.busy_timeout_ms,
    )?);
    let services = Arc::new(Services::new(db, &config));

    if let Some(seed) = &args.seed {
        let import = load_seed(seed)?;
        let stats = services.import_content(&import)?;
        info!(
            path = %seed.display(),
            worlds = stats.worlds,
            lessons = stats.lessons,
            cards = stats.cards,
            "Seed content loaded"
        );
    }

    let _listener = spawn_logging_listener(services.events.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let worker = CardRetryWorker::new(services.cards.clone(), config.card_retry.interval())
        .spawn(shutdown_rx);

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(HttpServer::new(services.clone(), http_addr));
    info!("HTTP API available at http://{}", http_addr);
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    let _ = shutdown_tx.send(());
    let _ = worker.await;

    if let Ok(stats) = services.db().stats() {
        info!(
            attempts = stats.attempt_count,
            profiles = stats.profile_count,
            card_unlocks = stats.card_unlock_count,
            pending_card_jobs = stats.pending_card_jobs,
            "Final ledger stats"
        );
    }

    Ok(())
}
