mod api;
mod config;
mod db;
mod error;
mod report;
mod types;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::{Config, StoreBackend};
use crate::db::{EventStore, MemoryEventStore, SqliteEventStore};
use crate::error::Result;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!("Starting stats backend");

    match cfg.store_backend {
        StoreBackend::Sqlite => {
            let store = connect_with_retry(&cfg).await;
            store.migrate().await?;
            info!("Database ready at {}", cfg.database_url);
            serve(store, &cfg).await
        }
        StoreBackend::Memory => {
            warn!("STORE_BACKEND=memory: events live in process memory and are lost on restart");
            serve(MemoryEventStore::new(), &cfg).await
        }
    }
}

/// Blocks startup until the database accepts connections.
async fn connect_with_retry(cfg: &Config) -> SqliteEventStore {
    loop {
        match SqliteEventStore::connect(cfg).await {
            Ok(store) => return store,
            Err(e) => {
                warn!(
                    "Waiting for database at {} ({e}), retrying in {}s",
                    cfg.database_url,
                    cfg.db_connect_retry.as_secs()
                );
                tokio::time::sleep(cfg.db_connect_retry).await;
            }
        }
    }
}

async fn serve<S: EventStore>(store: S, cfg: &Config) -> Result<()> {
    let app = router(ApiState::new(store, cfg.report_window));
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!(
        "HTTP API listening on {} (report window {}s)",
        cfg.bind_addr,
        cfg.report_window.as_secs()
    );

    axum::serve(listener, app).await?;

    Ok(())
}
