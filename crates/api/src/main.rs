//! API server entry point.

use std::error::Error;
use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{AppState, Coordinator};
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use inventory::{
    AtomicStockLedger, Database, InMemoryDatabase, InventoryReservationStore, PostgresDatabase,
    demo_catalog,
};
use saga::{InMemoryShippingService, SagaCoordinator, TokioTimer};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve<S, D>(config: Config, store: S, db: D) -> Result<(), Box<dyn Error>>
where
    S: EventStore + Clone + 'static,
    D: Database + 'static,
{
    let ledger = AtomicStockLedger::new();
    for (product_id, stock) in &config.flash_sale_stock {
        ledger.preheat(product_id.clone(), *stock);
        tracing::info!(%product_id, stock, "flash-sale stock preheated");
    }

    let coordinator: Coordinator<S, D> = SagaCoordinator::new(
        store,
        InventoryReservationStore::new(db),
        InMemoryShippingService::new(),
        TokioTimer,
        config.saga_config(),
    );
    coordinator.resume_all().await?;

    let state = Arc::new(AppState::new(coordinator, ledger));
    let app = api::create_app(state.clone());

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.coordinator.shutdown();
    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;
    init_tracing(&config);

    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(20).connect(&url).await?;
            let store = PostgresEventStore::new(pool.clone());
            store.run_migrations().await?;
            let db = PostgresDatabase::new(pool);
            tracing::info!("using PostgreSQL backends");
            serve(config, store, db).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory backends with demo products");
            let db = InMemoryDatabase::with_products(demo_catalog());
            serve(config, InMemoryEventStore::new(), db).await
        }
    }
}
