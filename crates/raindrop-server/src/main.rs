mod app;
mod cli;
mod error;
mod handlers;
mod model;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use raindrop_storage::{InMemorySlotStore, MySqlSlotStore, PostgresSlotStore, SlotStore};
use raindrop_worker::Raindrop;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::{Cli, LogFormat, StorageBackendArg};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!(
        listen_addr = %cli.listen_addr,
        storage_backend = %cli.storage,
        time_unit = %cli.time_unit,
        table = %cli.table_name,
        "starting raindrop server"
    );

    let store = connect_store(&cli).await?;
    let raindrop = Raindrop::initialize(cli.raindrop_config(), store)
        .await
        .context("failed to initialize raindrop")?;
    let raindrop = Arc::new(raindrop);

    let listener = tokio::net::TcpListener::bind(cli.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen_addr))?;
    info!(
        listen_addr = %listener.local_addr()?,
        worker_id = raindrop.worker_id(),
        "raindrop server listening"
    );

    axum::serve(listener, App::router(AppState::new(Arc::clone(&raindrop))))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    raindrop.shutdown().await;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn connect_store(cli: &Cli) -> anyhow::Result<Arc<dyn SlotStore>> {
    let store: Arc<dyn SlotStore> = match cli.storage {
        StorageBackendArg::InMemory => Arc::new(InMemorySlotStore::new()),
        StorageBackendArg::Mysql => {
            let url = cli
                .database_url
                .as_deref()
                .context("database url is required when storage backend is mysql")?;
            Arc::new(MySqlSlotStore::connect(url, cli.table_name.as_str()).await?)
        }
        StorageBackendArg::Postgres => {
            let url = cli
                .database_url
                .as_deref()
                .context("database url is required when storage backend is postgres")?;
            Arc::new(PostgresSlotStore::connect(url, cli.table_name.as_str()).await?)
        }
    };
    Ok(store)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}
