use std::sync::Arc;

use tokio::sync::watch;

use peep::config::Config;
use peep::db;
use peep::ingest::Ingestor;
use peep::services::{AlertEngine, LogStore, RetentionManager};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env();
    log::info!("Starting Peep, store at {}", config.db_path);

    let pool = db::create_pool(&config.db_path).await.map_err(|e| {
        log::error!("Database pool error: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    db::bootstrap_schema(&pool).await.map_err(|e| {
        log::error!("Schema bootstrap error: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    let store = LogStore::new(pool);

    let engine = Arc::new(AlertEngine::new(store.clone(), config.engine.clone()));
    engine.load().await.map_err(|e| {
        log::error!("Failed to load alert engine state: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    let retention = Arc::new(RetentionManager::new(store.clone(), config.retention.clone()));
    let ingestor = Arc::new(Ingestor::new(store.clone()).with_retention(retention.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine_task = tokio::spawn({
        let engine = engine.clone();
        let shutdown = shutdown_rx.clone();
        async move { engine.run(shutdown).await }
    });
    let retention_task = tokio::spawn({
        let retention = retention.clone();
        let shutdown = shutdown_rx.clone();
        async move { retention.run(shutdown).await }
    });
    let ingest_task = tokio::spawn({
        let ingestor = ingestor.clone();
        let shutdown = shutdown_rx.clone();
        async move { ingestor.run_stdin(shutdown).await }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, stopping...");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(engine_task, retention_task, ingest_task);

    log::info!("Peep stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                log::error!("Failed to install Ctrl+C handler: {}", e);
                // Wait forever if signal handler fails
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
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
}
