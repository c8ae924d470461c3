use mailfan::blob::MemoryBlobStore;
use mailfan::campaign::{AttachmentRef, CampaignStatus, CampaignStore, CampaignSubmission, Role};
use mailfan::database::create_tables;
use mailfan::intake::{IntakeError, IntakeService};
use mailfan::queue::WorkQueue;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;

async fn test_db() -> Arc<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options).await.expect("connect");
    create_tables(&db).await.expect("create tables");
    Arc::new(db)
}

fn submission() -> CampaignSubmission {
    CampaignSubmission {
        campaign_name: "Spring launch".to_string(),
        subject: "Hello {{first_name}}".to_string(),
        body_html: "<p>Hi {{first_name}}</p>".to_string(),
        from_address: "sender@corp.com".to_string(),
        target_emails: vec![],
        to: vec![],
        cc: vec![],
        bcc: vec![],
        attachments: vec![],
        launched_by: "ops@corp.com".to_string(),
    }
}

struct Harness {
    store: Arc<CampaignStore>,
    queue: Arc<WorkQueue>,
    blobs: Arc<MemoryBlobStore>,
    intake: IntakeService,
}

async fn harness() -> Harness {
    let db = test_db().await;
    let store = Arc::new(CampaignStore::new(db.clone()));
    let queue = Arc::new(WorkQueue::new(db));
    let blobs = Arc::new(MemoryBlobStore::new());
    let intake = IntakeService::new(store.clone(), queue.clone(), blobs.clone());
    Harness {
        store,
        queue,
        blobs,
        intake,
    }
}

#[tokio::test]
async fn test_simple_fanout_expansion() {
    let h = harness().await;

    let mut submission = submission();
    submission.target_emails = vec![
        "a@x.com".to_string(),
        "b@x.com".to_string(),
        "c@x.com".to_string(),
    ];

    let campaign_id = h.intake.submit(submission).await.expect("accepted");

    let campaign = h.store.get(&campaign_id).await.expect("stored");
    assert_eq!(campaign.total, 3);
    assert_eq!(campaign.sent_count, 0);
    assert_eq!(campaign.failed_count, 0);
    assert_eq!(campaign.status, CampaignStatus::Queued);
    assert!(campaign.sent_at.is_none());

    let received = h
        .queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    assert_eq!(received.len(), 3);
    for item in &received {
        assert_eq!(item.item.campaign_id, campaign_id);
        assert!(item.item.role.is_none());
        assert!(!item.item.idempotency_token.is_empty());
    }
}

#[tokio::test]
async fn test_dedup_against_cc() {
    let h = harness().await;

    let mut submission = submission();
    submission.target_emails = vec!["a@x.com".to_string(), "b@x.com".to_string()];
    submission.cc = vec!["b@x.com".to_string(), "ops@y.com".to_string()];

    let campaign_id = h.intake.submit(submission).await.expect("accepted");

    let campaign = h.store.get(&campaign_id).await.expect("stored");
    assert_eq!(campaign.total, 3);
    // target_emails is stored as submitted (normalized), before subtraction
    assert_eq!(campaign.target_emails, vec!["a@x.com", "b@x.com"]);

    let received = h
        .queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    assert_eq!(received.len(), 3);

    let role_of = |address: &str| {
        received
            .iter()
            .find(|r| r.item.recipient_address == address)
            .map(|r| r.item.role)
            .expect("item present")
    };
    assert_eq!(role_of("a@x.com"), None);
    assert_eq!(role_of("b@x.com"), Some(Role::Cc));
    assert_eq!(role_of("ops@y.com"), Some(Role::Cc));

    // b@x.com is enqueued exactly once, with the explicit role winning
    let b_items = received
        .iter()
        .filter(|r| r.item.recipient_address == "b@x.com")
        .count();
    assert_eq!(b_items, 1);
}

#[tokio::test]
async fn test_cc_only_campaign() {
    let h = harness().await;

    let mut submission = submission();
    submission.cc = vec!["exec@y.com".to_string()];

    let campaign_id = h.intake.submit(submission).await.expect("accepted");
    let campaign = h.store.get(&campaign_id).await.expect("stored");
    assert_eq!(campaign.total, 1);

    let received = h
        .queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].item.recipient_address, "exec@y.com");
    assert_eq!(received[0].item.role, Some(Role::Cc));
}

#[tokio::test]
async fn test_addresses_normalized_and_deduplicated() {
    let h = harness().await;

    let mut submission = submission();
    submission.target_emails = vec![
        " A@X.com ".to_string(),
        "a@x.com".to_string(),
        "B@x.com".to_string(),
    ];

    let campaign_id = h.intake.submit(submission).await.expect("accepted");
    let campaign = h.store.get(&campaign_id).await.expect("stored");
    assert_eq!(campaign.total, 2);
    assert_eq!(campaign.target_emails, vec!["a@x.com", "b@x.com"]);
}

#[tokio::test]
async fn test_rejects_empty_recipient_union() {
    let h = harness().await;
    match h.intake.submit(submission()).await {
        Err(IntakeError::NoRecipients) => {}
        other => panic!("expected NoRecipients, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejects_bad_address_and_persists_nothing() {
    let h = harness().await;

    let mut bad = submission();
    bad.target_emails = vec!["a@x.com".to_string(), "not-an-email".to_string()];

    match h.intake.submit(bad).await {
        Err(IntakeError::InvalidAddress(address)) => assert_eq!(address, "not-an-email"),
        other => panic!("expected InvalidAddress, got {other:?}"),
    }

    let received = h
        .queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_rejects_empty_subject() {
    let h = harness().await;
    let mut bad = submission();
    bad.subject = "   ".to_string();
    bad.target_emails = vec!["a@x.com".to_string()];
    assert!(matches!(
        h.intake.submit(bad).await,
        Err(IntakeError::EmptySubject)
    ));
}

#[tokio::test]
async fn test_rejects_missing_blob() {
    let h = harness().await;

    let mut bad = submission();
    bad.target_emails = vec!["a@x.com".to_string()];
    bad.attachments = vec![AttachmentRef {
        filename: "report.pdf".to_string(),
        content_type: "application/pdf".to_string(),
        blob_key: "nowhere".to_string(),
        inline: false,
        content_id: None,
    }];

    match h.intake.submit(bad).await {
        Err(IntakeError::MissingBlob(key)) => assert_eq!(key, "nowhere"),
        other => panic!("expected MissingBlob, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejects_oversized_composed_message() {
    let h = harness().await;
    h.blobs
        .insert("big", vec![0u8; 41 * 1024 * 1024], "application/octet-stream");

    let mut bad = submission();
    bad.target_emails = vec!["a@x.com".to_string()];
    bad.attachments = vec![AttachmentRef {
        filename: "big.bin".to_string(),
        content_type: "application/octet-stream".to_string(),
        blob_key: "big".to_string(),
        inline: false,
        content_id: None,
    }];

    match h.intake.submit(bad).await {
        Err(IntakeError::MessageTooLarge { size, max }) => {
            assert!(size > max);
        }
        other => panic!("expected MessageTooLarge, got {other:?}"),
    }
}

#[tokio::test]
async fn test_validation_errors_are_not_retryable() {
    let h = harness().await;
    let err = h.intake.submit(submission()).await.unwrap_err();
    assert!(!err.is_retryable());
}
