//! Install Scheduler Server
//!
//! REST API server for booking delivery and installation appointments.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use install_scheduler::{
    clock::{Clock, SystemClock},
    config::{AppConfig, StorageBackend},
    create_router,
    repository::{memory::MemoryStore, Repository},
    services::{
        notifications::{Notifier, TracingNotifier},
        reconciliation::ReconciliationService,
        redis::RedisReminderQueue,
        Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("install_scheduler={},tower_http=debug", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Install Scheduler v{}", env!("CARGO_PKG_VERSION"));

    let repository = match config.database.backend {
        StorageBackend::Postgres => {
            // Create database connection pool
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .connect(&config.database.url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Connected to database");

            // Run migrations
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;

            tracing::info!("Database migrations completed");
            Repository::new(pool)
        }
        StorageBackend::Memory => {
            let store = MemoryStore::new();
            let slots = store.seed_default_slots()?;
            tracing::warn!(slots = slots.len(), "Using in-memory storage, data is lost on restart");
            Repository::in_memory(store)
        }
    };

    // Reminder delivery
    let notifier: Arc<dyn Notifier> = if config.redis.enabled {
        let queue = RedisReminderQueue::new(&config.redis.url)
            .await
            .context("Failed to connect to Redis")?;
        tracing::info!("Connected to Redis");
        Arc::new(queue)
    } else {
        Arc::new(TracingNotifier)
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let services = Services::new(repository, notifier, clock, config.scheduling.clone());

    spawn_reconciliation(
        services.reconciliation.clone(),
        config.scheduling.reconcile_interval_seconds,
    );

    // Save server address before moving config
    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodic ledger sweep; an interval of 0 disables it
fn spawn_reconciliation(service: ReconciliationService, interval_seconds: u64) {
    if interval_seconds == 0 {
        tracing::info!("Ledger reconciliation disabled");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = service.sweep().await {
                tracing::error!("Ledger reconciliation failed: {}", e);
            }
        }
    });
}
