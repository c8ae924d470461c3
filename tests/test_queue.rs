use mailfan::campaign::{Role, WorkItem};
use mailfan::database::create_tables;
use mailfan::queue::WorkQueue;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn test_db() -> Arc<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options).await.expect("connect");
    create_tables(&db).await.expect("create tables");
    Arc::new(db)
}

/// Contended connection for concurrency tests. Point MF_TEST_DATABASE_URL at
/// a Postgres database to exercise real MVCC interleaving; the sqlite
/// default serializes on its single shared connection.
async fn contended_db() -> Arc<DatabaseConnection> {
    let url = std::env::var("MF_TEST_DATABASE_URL")
        .unwrap_or_else(|_| "sqlite::memory:".to_string());
    let mut options = ConnectOptions::new(&url);
    options.max_connections(if url.starts_with("sqlite") { 1 } else { 8 });
    let db = Database::connect(options).await.expect("connect");
    create_tables(&db).await.expect("create tables");
    Arc::new(db)
}

fn item(campaign_id: &str, recipient: &str, role: Option<Role>, token: &str) -> WorkItem {
    WorkItem {
        campaign_id: campaign_id.to_string(),
        recipient_address: recipient.to_string(),
        role,
        idempotency_token: token.to_string(),
    }
}

#[tokio::test]
async fn test_enqueue_receive_ack() {
    let queue = WorkQueue::new(test_db().await);

    queue
        .enqueue(&[
            item("c1", "a@x.com", None, "t-1"),
            item("c1", "b@x.com", Some(Role::Cc), "t-2"),
            item("c1", "c@x.com", Some(Role::Bcc), "t-3"),
        ])
        .await
        .expect("enqueue");

    let received = queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    assert_eq!(received.len(), 3);
    assert_eq!(received[0].item.recipient_address, "a@x.com");
    assert_eq!(received[1].item.role, Some(Role::Cc));
    assert_eq!(received[2].item.role, Some(Role::Bcc));
    assert!(received.iter().all(|r| r.receive_count == 1));

    // Claimed items are invisible to other receivers
    let second = queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    assert!(second.is_empty());

    for r in &received {
        queue.ack(&r.handle).await.expect("ack");
    }
    assert_eq!(queue.pending_count("c1").await.expect("count"), 0);
}

#[tokio::test]
async fn test_receive_respects_batch_cap() {
    let queue = WorkQueue::new(test_db().await);

    let items: Vec<WorkItem> = (0..15)
        .map(|i| item("c1", &format!("r{i}@x.com"), None, &format!("t-{i}")))
        .collect();
    queue.enqueue(&items).await.expect("enqueue");

    let received = queue
        .receive(50, Duration::from_secs(60))
        .await
        .expect("receive");
    assert_eq!(received.len(), 10);
}

#[tokio::test]
async fn test_unacked_items_are_redelivered_after_timeout() {
    let queue = WorkQueue::new(test_db().await);
    queue
        .enqueue(&[item("c1", "a@x.com", None, "t-1")])
        .await
        .expect("enqueue");

    let first = queue
        .receive(10, Duration::from_millis(50))
        .await
        .expect("receive");
    assert_eq!(first.len(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;

    let second = queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].receive_count, 2);
    assert_eq!(second[0].item.idempotency_token, "t-1");

    // The stale receipt from the first claim no longer acks anything
    queue.ack(&first[0].handle).await.expect("stale ack is ok");
    assert_eq!(queue.pending_count("c1").await.expect("count"), 1);

    queue.ack(&second[0].handle).await.expect("ack");
    assert_eq!(queue.pending_count("c1").await.expect("count"), 0);
}

#[tokio::test]
async fn test_delay_postpones_delivery() {
    let queue = WorkQueue::new(test_db().await);
    queue
        .enqueue(&[item("c1", "a@x.com", None, "t-1")])
        .await
        .expect("enqueue");

    let received = queue
        .receive(10, Duration::from_millis(50))
        .await
        .expect("receive");
    queue
        .delay(&received[0].handle, Duration::from_secs(3600))
        .await
        .expect("delay");

    tokio::time::sleep(Duration::from_millis(80)).await;
    let after = queue
        .receive(10, Duration::from_secs(60))
        .await
        .expect("receive");
    assert!(after.is_empty());
}

#[tokio::test]
async fn test_stats_split_visible_and_in_flight() {
    let queue = WorkQueue::new(test_db().await);
    queue
        .enqueue(&[
            item("c1", "a@x.com", None, "t-1"),
            item("c1", "b@x.com", None, "t-2"),
            item("c1", "c@x.com", None, "t-3"),
        ])
        .await
        .expect("enqueue");

    let stats = queue.stats().await.expect("stats");
    assert_eq!(stats.visible, 3);
    assert_eq!(stats.in_flight, 0);

    let received = queue
        .receive(2, Duration::from_secs(60))
        .await
        .expect("receive");
    assert_eq!(received.len(), 2);

    let stats = queue.stats().await.expect("stats");
    assert_eq!(stats.visible, 1);
    assert_eq!(stats.in_flight, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_receives_claim_disjoint_items() {
    let queue = Arc::new(WorkQueue::new(contended_db().await));
    let campaign_id = Uuid::new_v4().to_string();

    let items: Vec<WorkItem> = (0..10)
        .map(|i| item(&campaign_id, &format!("r{i}@x.com"), None, &format!("{campaign_id}-t-{i}")))
        .collect();
    queue.enqueue(&items).await.expect("enqueue");

    // Two receivers race for the same rows; no item may be handed to both
    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .receive(5, Duration::from_secs(60))
                    .await
                    .expect("receive")
            })
        })
        .collect();

    let mut claimed_ids = HashSet::new();
    let mut claimed_tokens = HashSet::new();
    for task in tasks {
        for received in task.await.expect("join") {
            assert_eq!(received.item.campaign_id, campaign_id);
            assert!(
                claimed_ids.insert(received.handle.id.clone()),
                "item {} claimed by two receivers",
                received.handle.id
            );
            assert!(claimed_tokens.insert(received.item.idempotency_token.clone()));
        }
    }

    // A claim that lost rows to the other receiver leaves them claimable;
    // draining afterwards must account for every item exactly once
    loop {
        let rest = queue
            .receive(10, Duration::from_secs(60))
            .await
            .expect("receive");
        if rest.is_empty() {
            break;
        }
        for received in rest {
            assert!(
                claimed_ids.insert(received.handle.id.clone()),
                "item {} claimed twice",
                received.handle.id
            );
        }
    }
    assert_eq!(claimed_ids.len(), 10);
    assert_eq!(
        queue.pending_count(&campaign_id).await.expect("count"),
        10,
        "claimed items are hidden, not gone"
    );
}

#[tokio::test]
async fn test_purge_campaign_removes_only_that_campaign() {
    let queue = WorkQueue::new(test_db().await);
    queue
        .enqueue(&[
            item("c1", "a@x.com", None, "t-1"),
            item("c2", "b@x.com", None, "t-2"),
        ])
        .await
        .expect("enqueue");

    let purged = queue.purge_campaign("c1").await.expect("purge");
    assert_eq!(purged, 1);
    assert_eq!(queue.pending_count("c1").await.expect("count"), 0);
    assert_eq!(queue.pending_count("c2").await.expect("count"), 1);
}
