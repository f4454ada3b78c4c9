//! Revu Server - Main entry point

use anyhow::Result;
use revu_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tracing::{info, warn};

use revu_server::{
    api::{self, AppState},
    config::Config,
    features::FeatureState,
    ingest::{IngestSettings, ProgressBroadcaster, UploadCoordinator},
    storage::SessionStorage,
    store::Stores,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("revu-server")
        .filter_directives("revu_server=debug,tower_http=debug,axum=info,sqlx=warn")
        .build()
        .merge_env()?;

    // Dropping the guard would lose buffered file output
    let _log_guard = init_logging(&log_config)?;

    info!("Starting Revu Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let (stores, db) = match &config.database.url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
                .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
                .connect(url)
                .await?;
            info!("Database connection pool established");

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            info!("Database migrations completed");

            (Stores::postgres(pool.clone()), Some(pool))
        },
        None => {
            warn!("DATABASE_URL not set, file index is kept in memory and lost on restart");
            (Stores::in_memory(), None)
        },
    };

    let storage = SessionStorage::from_config(&config.upload);
    storage.init().await?;
    info!(
        data_dir = %storage.root().display(),
        temp_dir = %storage.temp_dir().display(),
        "Session storage ready"
    );

    let coordinator = UploadCoordinator::new(
        stores,
        storage,
        ProgressBroadcaster::new(config.upload.subscriber_buffer),
        IngestSettings::from(&config.upload),
    );

    let features = FeatureState {
        coordinator,
        max_archive_bytes: config.upload.max_archive_bytes,
    };
    let app = api::create_router(AppState { db }, features, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Open event streams keep connections alive; give them a bounded grace period
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
