use crate::config::WorkerPoolConfig;
use crate::dispatch::worker::DispatchWorker;
use crate::error::Result;
use crate::queue::{ReceivedItem, WorkQueue};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Pool of dispatch invocations. Each worker task claims one batch at a
/// time and processes it sequentially; concurrency comes from running many
/// such invocations side by side, never from sharing state between them.
#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    worker: Arc<DispatchWorker>,
    config: WorkerPoolConfig,
    handles: Arc<RwLock<Vec<JoinHandle<()>>>>,
    is_running: Arc<AtomicBool>,
    processed_batches: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(queue: Arc<WorkQueue>, worker: Arc<DispatchWorker>, config: WorkerPoolConfig) -> Self {
        Self {
            queue,
            worker,
            config,
            handles: Arc::new(RwLock::new(Vec::new())),
            is_running: Arc::new(AtomicBool::new(false)),
            processed_batches: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Worker pool is already running");
            return Ok(());
        }

        tracing::info!(
            workers = self.config.worker_count,
            batch_size = self.config.batch_size,
            "Starting dispatch worker pool"
        );

        let mut handles = self.handles.write().await;
        for i in 0..self.config.worker_count {
            let worker_id = format!("dispatch-worker-{i}");
            handles.push(self.spawn_worker(worker_id));
        }
        Ok(())
    }

    fn spawn_worker(&self, worker_id: String) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            tracing::info!("Worker {} started", worker_id);

            while pool.is_running.load(Ordering::SeqCst) {
                match pool
                    .queue
                    .receive(pool.config.batch_size, pool.config.visibility_timeout)
                    .await
                {
                    Ok(received) if received.is_empty() => {
                        sleep(pool.config.poll_interval).await;
                    }
                    Ok(received) => {
                        pool.run_invocation(&worker_id, received).await;
                    }
                    Err(e) => {
                        tracing::error!(
                            worker_id = %worker_id,
                            error = %e,
                            "Receive failed, backing off"
                        );
                        sleep(pool.config.poll_interval).await;
                    }
                }
            }

            tracing::info!("Worker {} stopped", worker_id);
        })
    }

    async fn run_invocation(&self, worker_id: &str, received: Vec<ReceivedItem>) {
        let items: Vec<_> = received.iter().map(|r| r.item.clone()).collect();

        match self.worker.process_batch(&items).await {
            Ok(report) => {
                // Every attempted item leaves the queue, whatever its
                // outcome; deferred items come back via visibility timeout.
                for (received_item, outcome) in received.iter().zip(&report.outcomes) {
                    if !outcome.attempted() {
                        continue;
                    }
                    if let Err(e) = self.queue.ack(&received_item.handle).await {
                        tracing::error!(
                            worker_id = %worker_id,
                            item_id = %received_item.handle.id,
                            error = %e,
                            "Failed to ack processed item"
                        );
                    }
                }
                self.processed_batches.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::error!(
                    worker_id = %worker_id,
                    error = %e,
                    "Fatal batch error, leaving items for redelivery"
                );
                sleep(self.config.poll_interval).await;
            }
        }
    }

    pub async fn stop(&self) {
        tracing::info!("Stopping dispatch worker pool...");
        self.is_running.store(false, Ordering::SeqCst);

        let mut handles = self.handles.write().await;
        for handle in handles.drain(..) {
            match tokio::time::timeout(Duration::from_secs(30), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Worker stopped with error");
                }
                Err(_) => {
                    tracing::warn!("Worker shutdown timed out");
                }
            }
        }
        tracing::info!("Dispatch worker pool stopped");
    }

    pub fn processed_batches(&self) -> u64 {
        self.processed_batches.load(Ordering::SeqCst)
    }
}
