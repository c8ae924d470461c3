use std::sync::Arc;

use mailfan::blob::FsBlobStore;
use mailfan::campaign::CampaignStore;
use mailfan::config::Config;
use mailfan::database::{create_tables, establish_connection};
use mailfan::dispatch::{DispatchWorker, WorkerPool};
use mailfan::metrics::EngineMetrics;
use mailfan::provider::SmtpProvider;
use mailfan::queue::WorkQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting mailfan dispatch daemon");

    // Connect to the store
    let db = establish_connection(&config.database_url).await?;
    let db = Arc::new(db);
    create_tables(&db).await?;

    let store = Arc::new(CampaignStore::new(db.clone()));
    let queue = Arc::new(WorkQueue::new(db.clone()));
    let blobs = Arc::new(FsBlobStore::new(&config.blob_root));
    let provider = Arc::new(SmtpProvider::new(&config.smtp)?);
    let metrics = Arc::new(EngineMetrics::new());

    let worker = Arc::new(DispatchWorker::new(
        store,
        blobs,
        provider,
        metrics.clone(),
        config.rate.clone(),
        config.worker_pool.batch_budget,
    ));

    let pool = WorkerPool::new(queue.clone(), worker, config.worker_pool.clone());

    // Periodic cleanup of finished campaigns and their attempt ledgers
    let cleanup_store = CampaignStore::new(db.clone());
    let cleanup_queue = queue.clone();
    let retention = config.cleanup_retention;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;

            match cleanup_store.cleanup_finished(retention).await {
                Ok(removed) => {
                    if removed > 0 {
                        tracing::info!("Removed {} finished campaigns", removed);
                    }
                }
                Err(e) => {
                    tracing::error!("Error cleaning up finished campaigns: {}", e);
                }
            }

            match cleanup_queue.stats().await {
                Ok(stats) => {
                    tracing::debug!(
                        visible = stats.visible,
                        in_flight = stats.in_flight,
                        "Queue depth"
                    );
                }
                Err(e) => {
                    tracing::error!("Error reading queue stats: {}", e);
                }
            }
        }
    });

    tracing::info!("Initializing worker pool...");
    match pool.start().await {
        Ok(()) => {
            tracing::info!("Worker pool started successfully");
        }
        Err(e) => {
            tracing::error!("Failed to start worker pool: {}", e);
            return Err(e.into());
        }
    }

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    pool.stop().await;

    let snapshot = metrics.snapshot();
    tracing::info!(
        messages_failed = snapshot.messages_failed,
        throttle_events = snapshot.throttle_events,
        batches = pool.processed_batches(),
        "Dispatch daemon stopped"
    );
    Ok(())
}
