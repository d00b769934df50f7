use std::path::Path;
use std::sync::Arc;

use taskwarden::config::WorkerConfig;
use taskwarden::store::{LibSqlStore, TaskStore};
use taskwarden::worker::CompletionWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WorkerConfig::from_env()?;

    let db_path = std::env::var("TASKWARDEN_DB_PATH")
        .unwrap_or_else(|_| "./data/taskwarden.db".to_string());
    let store: Arc<dyn TaskStore> = Arc::new(LibSqlStore::new_local(Path::new(&db_path)).await?);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %db_path,
        auto_complete_minutes = config.complete_after.as_secs() / 60,
        "taskwarden starting"
    );

    let worker = CompletionWorker::new(store, config);
    worker.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // Drains queued completions before exiting.
    worker.stop().await;

    Ok(())
}
