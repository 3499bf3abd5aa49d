//! storehub server

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storehub::config::{Config, StorageKind};
use storehub::http::{app, AppState};
use storehub::services::EventPublisher;
use storehub::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = Config::from_env()?;
    let store: Arc<dyn Store> = match config.storage {
        StorageKind::Postgres => {
            let url = config.database_url.as_deref().context("DATABASE_URL must be set")?;
            Arc::new(PgStore::connect(url, config.db_max_connections).await?)
        }
        StorageKind::Memory => Arc::new(MemoryStore::new()),
    };
    let events = EventPublisher::connect(config.nats_url.as_deref()).await;
    let port = config.port;
    let state = AppState::new(store.clone(), config, events);

    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, storage = store.backend(), "storehub listening");
    axum::serve(listener, app(state)).with_graceful_shutdown(shutdown_signal()).await?;
    info!("storehub stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_ok() { info!("received Ctrl+C, shutting down"); }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => { s.recv().await; info!("received terminate signal, shutting down"); }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
