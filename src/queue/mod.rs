use crate::campaign::models::{Role, WorkItem};
use crate::database::work_items;
use crate::error::Result;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on one receive call, matching the provider queue's batch API.
pub const MAX_RECEIVE_BATCH: usize = 10;

const ENQUEUE_CHUNK: usize = 100;

/// Claim ticket for one received item. Acking with a superseded receipt
/// (the item timed out and was claimed again) removes nothing.
#[derive(Debug, Clone)]
pub struct AckHandle {
    pub id: String,
    pub receipt: String,
}

#[derive(Debug, Clone)]
pub struct ReceivedItem {
    pub item: WorkItem,
    pub handle: AckHandle,
    pub receive_count: u32,
}

/// At-least-once work item queue over the store. Items are visible when
/// `visible_at` is in the past; receiving hides them for the visibility
/// timeout and deleting requires the receipt issued by that claim.
pub struct WorkQueue {
    db: Arc<DatabaseConnection>,
}

impl WorkQueue {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Enqueue work items in insertion order, chunked to bounded statements.
    pub async fn enqueue(&self, items: &[WorkItem]) -> Result<()> {
        let now = chrono::Utc::now().timestamp_micros();

        for chunk in items.chunks(ENQUEUE_CHUNK) {
            let rows: Vec<work_items::ActiveModel> = chunk
                .iter()
                .map(|item| work_items::ActiveModel {
                    id: Set(Uuid::now_v7().to_string()),
                    campaign_id: Set(item.campaign_id.clone()),
                    recipient_address: Set(item.recipient_address.clone()),
                    role: Set(item.role.map(|r| r.as_str().to_string())),
                    idempotency_token: Set(item.idempotency_token.clone()),
                    visible_at: Set(now),
                    receive_count: Set(0),
                    receipt: Set(None),
                    created_at: Set(now),
                })
                .collect();
            work_items::Entity::insert_many(rows).exec(&*self.db).await?;
        }

        tracing::debug!(count = items.len(), "Work items enqueued");
        Ok(())
    }

    /// Claim up to `max` visible items (capped at the provider batch limit).
    /// Claimed items stay hidden until `visibility_timeout` elapses or the
    /// claimer acks them.
    pub async fn receive(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedItem>> {
        use sea_orm::{ConnectionTrait, Statement};

        let max = max.min(MAX_RECEIVE_BATCH);
        if max == 0 {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now().timestamp_micros();
        let hidden_until = now + visibility_timeout.as_micros() as i64;
        let receipt = Uuid::new_v4().to_string();

        // Atomic claim using raw SQL for database-level atomicity: two
        // receivers racing on the same rows must never both walk away with
        // an item. The outer visible_at predicate is re-evaluated per row
        // when the statement has to wait on a concurrent claim, so a row
        // hidden in the meantime drops out of this claim instead of being
        // claimed twice.
        let backend = self.db.get_database_backend();
        let (sql, values) = match backend {
            sea_orm::DbBackend::Postgres => (
                r#"
                UPDATE work_items
                SET
                    visible_at = $1,
                    receive_count = receive_count + 1,
                    receipt = $2
                WHERE visible_at <= $3
                  AND id IN (
                    SELECT id FROM work_items
                    WHERE visible_at <= $4
                    ORDER BY created_at ASC, id ASC
                    LIMIT $5
                )
                "#,
                vec![
                    hidden_until.into(),
                    receipt.clone().into(),
                    now.into(),
                    now.into(),
                    (max as i64).into(),
                ],
            ),
            _ => (
                r#"
                UPDATE work_items
                SET
                    visible_at = ?,
                    receive_count = receive_count + 1,
                    receipt = ?
                WHERE visible_at <= ?
                  AND id IN (
                    SELECT id FROM work_items
                    WHERE visible_at <= ?
                    ORDER BY created_at ASC, id ASC
                    LIMIT ?
                )
                "#,
                vec![
                    hidden_until.into(),
                    receipt.clone().into(),
                    now.into(),
                    now.into(),
                    (max as i64).into(),
                ],
            ),
        };

        let statement = Statement::from_sql_and_values(backend, sql, values);
        let query_result = self.db.execute(statement).await?;
        if query_result.rows_affected() == 0 {
            return Ok(Vec::new());
        }

        // The receipt is unique to this claim; read the claimed rows back
        let claimed = work_items::Entity::find()
            .filter(work_items::Column::Receipt.eq(&receipt))
            .order_by_asc(work_items::Column::CreatedAt)
            .order_by_asc(work_items::Column::Id)
            .all(&*self.db)
            .await?;

        let received: Vec<ReceivedItem> = claimed
            .into_iter()
            .map(|model| {
                let role = model.role.as_deref().and_then(Role::parse);
                let receive_count = model.receive_count.max(0) as u32;
                ReceivedItem {
                    item: WorkItem {
                        campaign_id: model.campaign_id,
                        recipient_address: model.recipient_address,
                        role,
                        idempotency_token: model.idempotency_token,
                    },
                    handle: AckHandle {
                        id: model.id,
                        receipt: receipt.clone(),
                    },
                    receive_count,
                }
            })
            .collect();

        tracing::debug!(count = received.len(), "Work items claimed");
        Ok(received)
    }

    /// Delete a processed item. Requires the receipt of the live claim.
    pub async fn ack(&self, handle: &AckHandle) -> Result<()> {
        let deleted = work_items::Entity::delete_many()
            .filter(work_items::Column::Id.eq(&handle.id))
            .filter(work_items::Column::Receipt.eq(&handle.receipt))
            .exec(&*self.db)
            .await?;

        if deleted.rows_affected == 0 {
            tracing::warn!(
                item_id = %handle.id,
                "Ack with stale receipt ignored; item was reclaimed"
            );
        }
        Ok(())
    }

    /// Postpone a claimed item instead of processing it now.
    pub async fn delay(&self, handle: &AckHandle, new_visibility: Duration) -> Result<()> {
        let visible_at =
            chrono::Utc::now().timestamp_micros() + new_visibility.as_micros() as i64;
        let updated = work_items::Entity::update_many()
            .col_expr(work_items::Column::VisibleAt, Expr::value(visible_at))
            .filter(work_items::Column::Id.eq(&handle.id))
            .filter(work_items::Column::Receipt.eq(&handle.receipt))
            .exec(&*self.db)
            .await?;

        if updated.rows_affected == 0 {
            tracing::warn!(
                item_id = %handle.id,
                "Delay with stale receipt ignored; item was reclaimed"
            );
        }
        Ok(())
    }

    /// Remove every queued item of one campaign. Intake uses this to roll a
    /// partially enqueued submission back.
    pub async fn purge_campaign(&self, campaign_id: &str) -> Result<u64> {
        let deleted = work_items::Entity::delete_many()
            .filter(work_items::Column::CampaignId.eq(campaign_id))
            .exec(&*self.db)
            .await?;
        Ok(deleted.rows_affected)
    }

    /// Number of items currently queued or in flight for a campaign.
    pub async fn pending_count(&self, campaign_id: &str) -> Result<u64> {
        use sea_orm::PaginatorTrait;
        let count = work_items::Entity::find()
            .filter(work_items::Column::CampaignId.eq(campaign_id))
            .count(&*self.db)
            .await?;
        Ok(count)
    }

    /// Queue depth split into claimable and in-flight items.
    pub async fn stats(&self) -> Result<QueueStats> {
        use sea_orm::PaginatorTrait;
        let now = chrono::Utc::now().timestamp_micros();

        let visible = work_items::Entity::find()
            .filter(work_items::Column::VisibleAt.lte(now))
            .count(&*self.db)
            .await?;
        let in_flight = work_items::Entity::find()
            .filter(work_items::Column::VisibleAt.gt(now))
            .count(&*self.db)
            .await?;

        Ok(QueueStats { visible, in_flight })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub visible: u64,
    pub in_flight: u64,
}
