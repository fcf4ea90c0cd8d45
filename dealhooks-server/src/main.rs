//! Dealhooks Server
//!
//! Ingests CRM deal webhooks, records them idempotently, and fans them
//! out to conversion tracking and transactional email.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use dealhooks_core::processors::dispatchers::{ConversionTracker, DispatcherSet, EmailNotifier};
use dealhooks_core::processors::event_processor::EventProcessor;
use dealhooks_core::providers::{CrmDealProvider, ProviderRegistry};
use dealhooks_core::queue::{DispatchQueue, WorkerPool};
use dealhooks_core::store::{PgReceiptStore, ReceiptStore};
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Dealhooks - CRM webhook ingestion and fan-out pipeline
#[derive(Parser, Debug)]
#[command(name = "dealhooks-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./dealhooks-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting dealhooks-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    let listen_addr = loaded.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    // Wire up the pipeline: store, queue, dispatchers, workers
    let store: Arc<dyn ReceiptStore> = Arc::new(PgReceiptStore::new(db_pool.clone()));

    let queue = Arc::new(DispatchQueue::new(loaded.retry_policy()));

    let dispatchers = DispatcherSet {
        conversion: Arc::new(ConversionTracker::new(
            loaded.downstream.conversion.endpoint.clone(),
            loaded.downstream.conversion.token.clone(),
        )),
        notification: Arc::new(EmailNotifier::new(
            loaded.downstream.email.endpoint.clone(),
            loaded.downstream.email.api_key.clone(),
            loaded.downstream.email.sender.clone(),
        )),
    };
    let processor = Arc::new(EventProcessor::new(Arc::clone(&store), dispatchers));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = WorkerPool::spawn(
        Arc::clone(&queue),
        processor,
        loaded.queue.workers,
        shutdown_rx,
    );
    tracing::info!(workers = loaded.queue.workers, "Worker pool started");

    // Register the accepted upstream sources
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(CrmDealProvider::new()));

    // Create application state
    let state = AppState::new(store, Arc::clone(&queue), Arc::new(registry), loaded.runtime);

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(state.clone(), config_loader);

    // Build the router
    let router = build_router(state);

    // Run the server
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    // Signal the config reload handler to stop
    reload_notify.notify_one();

    // Stop the pipeline: no new work, drain workers
    queue.close();
    let _ = shutdown_tx.send(true);
    workers.join().await;

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
