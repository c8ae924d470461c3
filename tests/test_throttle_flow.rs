use async_trait::async_trait;
use mailfan::blob::MemoryBlobStore;
use mailfan::campaign::{CampaignStatus, CampaignStore, CampaignSubmission};
use mailfan::config::RateConfig;
use mailfan::database::create_tables;
use mailfan::dispatch::{DispatchWorker, ItemStatus};
use mailfan::intake::IntakeService;
use mailfan::metrics::EngineMetrics;
use mailfan::provider::{MailProvider, ProviderError, RawSend, SimpleSend};
use mailfan::queue::WorkQueue;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provider double that replays scripted outcomes, then keeps accepting.
#[derive(Default)]
struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<u64>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self::default()
    }

    fn script_outcome(&self, outcome: Result<String, ProviderError>) {
        self.script.lock().expect("script lock").push_back(outcome);
    }

    fn calls(&self) -> u64 {
        *self.calls.lock().expect("calls lock")
    }

    fn next_outcome(&self) -> Result<String, ProviderError> {
        *self.calls.lock().expect("calls lock") += 1;
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Ok("mock-message-id".to_string()))
    }
}

#[async_trait]
impl MailProvider for ScriptedProvider {
    async fn send_simple(&self, _send: &SimpleSend) -> Result<String, ProviderError> {
        self.next_outcome()
    }

    async fn send_raw(&self, _send: &RawSend) -> Result<String, ProviderError> {
        self.next_outcome()
    }
}

struct Harness {
    store: Arc<CampaignStore>,
    queue: Arc<WorkQueue>,
    provider: Arc<ScriptedProvider>,
    metrics: Arc<EngineMetrics>,
    intake: IntakeService,
    worker: DispatchWorker,
}

async fn harness() -> Harness {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options).await.expect("connect");
    create_tables(&db).await.expect("create tables");
    let db: Arc<DatabaseConnection> = Arc::new(db);

    let store = Arc::new(CampaignStore::new(db.clone()));
    let queue = Arc::new(WorkQueue::new(db));
    let blobs = Arc::new(MemoryBlobStore::new());
    let provider = Arc::new(ScriptedProvider::new());
    let metrics = Arc::new(EngineMetrics::new());

    let rate = RateConfig {
        base_delay: Duration::from_millis(1),
        min_delay: Duration::ZERO,
        max_delay: Duration::from_millis(4),
        throttle_recovery_period: Duration::ZERO,
    };

    let intake = IntakeService::new(store.clone(), queue.clone(), blobs);
    let worker = DispatchWorker::new(
        store.clone(),
        Arc::new(MemoryBlobStore::new()),
        provider.clone(),
        metrics.clone(),
        rate,
        Duration::from_secs(900),
    );

    Harness {
        store,
        queue,
        provider,
        metrics,
        intake,
        worker,
    }
}

fn submission(recipients: usize) -> CampaignSubmission {
    CampaignSubmission {
        campaign_name: "Throttle run".to_string(),
        subject: "Hello".to_string(),
        body_html: "<p>Hi</p>".to_string(),
        from_address: "sender@corp.com".to_string(),
        target_emails: (0..recipients).map(|i| format!("r{i}@x.com")).collect(),
        to: vec![],
        cc: vec![],
        bcc: vec![],
        attachments: vec![],
        launched_by: "ops@corp.com".to_string(),
    }
}

#[tokio::test]
async fn test_throttles_count_as_failures_and_are_not_retried() {
    let h = harness().await;
    for _ in 0..5 {
        h.provider.script_outcome(Err(ProviderError::transport(
            Some("Throttling".to_string()),
            "Rate exceeded",
        )));
    }

    let campaign_id = h.intake.submit(submission(6)).await.expect("accepted");
    let received = h
        .queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    let items: Vec<_> = received.iter().map(|r| r.item.clone()).collect();
    let report = h.worker.process_batch(&items).await.expect("batch");

    // Per-item failures stay inside the batch; the batch itself succeeds
    assert_eq!(report.failed(), 5);
    assert_eq!(report.sent(), 1);
    assert!(matches!(report.outcomes[5].status, ItemStatus::Sent { .. }));

    // One provider call per item: no in-process retry of throttled sends
    assert_eq!(h.provider.calls(), 6);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.throttle_events, 5);
    assert_eq!(snapshot.messages_failed, 5);

    let campaign = h.store.get(&campaign_id).await.expect("get");
    assert_eq!(campaign.sent_count, 1);
    assert_eq!(campaign.failed_count, 5);
    assert_eq!(campaign.status, CampaignStatus::Completed);

    // Throttled items ack like any other failure
    for (r, outcome) in received.iter().zip(&report.outcomes) {
        if outcome.attempted() {
            h.queue.ack(&r.handle).await.expect("ack");
        }
    }
    assert_eq!(h.queue.pending_count(&campaign_id).await.expect("count"), 0);
}

#[tokio::test]
async fn test_non_throttle_errors_do_not_touch_throttle_metric() {
    let h = harness().await;
    h.provider.script_outcome(Err(ProviderError::transport(
        None,
        "connection reset by peer",
    )));

    h.intake.submit(submission(2)).await.expect("accepted");
    let received = h
        .queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    let items: Vec<_> = received.iter().map(|r| r.item.clone()).collect();
    let report = h.worker.process_batch(&items).await.expect("batch");

    assert_eq!(report.failed(), 1);
    assert_eq!(report.sent(), 1);
    assert_eq!(h.metrics.snapshot().throttle_events, 0);
    assert_eq!(h.metrics.snapshot().messages_failed, 1);
}

#[tokio::test]
async fn test_all_throttled_campaign_closes_failed() {
    let h = harness().await;
    for _ in 0..2 {
        h.provider.script_outcome(Err(ProviderError::transport(
            Some("SlowDown".to_string()),
            "Please slow down",
        )));
    }

    let campaign_id = h.intake.submit(submission(2)).await.expect("accepted");
    let received = h
        .queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    let items: Vec<_> = received.iter().map(|r| r.item.clone()).collect();
    h.worker.process_batch(&items).await.expect("batch");

    let campaign = h.store.get(&campaign_id).await.expect("get");
    assert_eq!(campaign.sent_count, 0);
    assert_eq!(campaign.failed_count, 2);
    assert_eq!(campaign.status, CampaignStatus::Failed);
    assert!(campaign.sent_at.is_none());
}
