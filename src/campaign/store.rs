use crate::campaign::models::{
    Campaign, CampaignCounters, CampaignStatus, ContactRecord, CounterUpdate,
};
use crate::database::{campaigns, contacts, send_attempts};
use crate::error::{EngineError, Result};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use std::sync::Arc;

const OUTCOME_SENT: &str = "sent";
const OUTCOME_FAILED: &str = "failed";

/// Campaign records and their live counters. All counter movement goes
/// through the token-conditional `update_on_send`/`update_on_fail`: the
/// `send_attempts` ledger row and the counter write commit in one
/// transaction, a replayed token is a no-op, and the increment itself runs
/// inside the database (counters and status are computed from the row's
/// current values in a single UPDATE) so concurrent updates for different
/// tokens serialize on the campaign row instead of losing increments.
pub struct CampaignStore {
    db: Arc<DatabaseConnection>,
}

impl CampaignStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Cheap connectivity probe used by the worker before per-item work
    /// begins.
    pub async fn ping(&self) -> Result<()> {
        self.db.ping().await?;
        Ok(())
    }

    pub async fn create(&self, campaign: &Campaign) -> Result<()> {
        if campaigns::Entity::find_by_id(&campaign.id)
            .one(&*self.db)
            .await?
            .is_some()
        {
            return Err(EngineError::DuplicateCampaign(campaign.id.clone()));
        }

        let now = chrono::Utc::now().timestamp_micros();
        let active_model = campaigns::ActiveModel {
            id: Set(campaign.id.clone()),
            campaign_name: Set(campaign.campaign_name.clone()),
            subject: Set(campaign.subject.clone()),
            body_html: Set(campaign.body_html.clone()),
            from_address: Set(campaign.from_address.clone()),
            launched_by: Set(campaign.launched_by.clone()),
            to_addresses: Set(serde_json::to_string(&campaign.to)?),
            cc_addresses: Set(serde_json::to_string(&campaign.cc)?),
            bcc_addresses: Set(serde_json::to_string(&campaign.bcc)?),
            target_emails: Set(serde_json::to_string(&campaign.target_emails)?),
            attachments: Set(serde_json::to_string(&campaign.attachments)?),
            total: Set(campaign.total as i32),
            sent_count: Set(0),
            failed_count: Set(0),
            status: Set(campaign.status.to_string()),
            sent_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        active_model.insert(&*self.db).await?;

        tracing::info!(
            campaign_id = %campaign.id,
            total = campaign.total,
            "Campaign record created"
        );
        Ok(())
    }

    pub async fn get(&self, campaign_id: &str) -> Result<Campaign> {
        let model = campaigns::Entity::find_by_id(campaign_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))?;
        Campaign::from_model(model)
    }

    pub async fn delete(&self, campaign_id: &str) -> Result<()> {
        campaigns::Entity::delete_by_id(campaign_id)
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Record a successful send. Increments `sent_count`, stamps `sent_at`
    /// on the first success, moves `queued` to `sending`, and closes the
    /// campaign as `completed` when every item is accounted for.
    pub async fn update_on_send(&self, campaign_id: &str, token: &str) -> Result<CounterUpdate> {
        self.conditional_update(campaign_id, token, OUTCOME_SENT).await
    }

    /// Record a failed send attempt. Increments `failed_count`; a campaign
    /// where every attempt failed closes as `failed`.
    pub async fn update_on_fail(&self, campaign_id: &str, token: &str) -> Result<CounterUpdate> {
        self.conditional_update(campaign_id, token, OUTCOME_FAILED)
            .await
    }

    async fn conditional_update(
        &self,
        campaign_id: &str,
        token: &str,
        outcome: &str,
    ) -> Result<CounterUpdate> {
        use sea_orm::{ConnectionTrait, Statement};

        let txn = self.db.begin().await?;

        let model = campaigns::Entity::find_by_id(campaign_id)
            .one(&txn)
            .await?
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))?;

        if send_attempts::Entity::find_by_id(token)
            .one(&txn)
            .await?
            .is_some()
        {
            txn.rollback().await?;
            tracing::debug!(
                campaign_id,
                token,
                "Idempotency token already recorded, counters unchanged"
            );
            return Ok(CounterUpdate {
                applied: false,
                counters: counters_of(&model),
            });
        }

        let now = chrono::Utc::now().timestamp_micros();
        let ledger = send_attempts::ActiveModel {
            token: Set(token.to_string()),
            campaign_id: Set(campaign_id.to_string()),
            outcome: Set(outcome.to_string()),
            created_at: Set(now),
        };
        if let Err(e) = ledger.insert(&txn).await {
            // Two workers replaying the same token can both pass the lookup
            // above; the ledger's primary key settles who was first.
            if matches!(e.sql_err(), Some(sea_orm::SqlErr::UniqueConstraintViolation(_))) {
                txn.rollback().await?;
                tracing::debug!(
                    campaign_id,
                    token,
                    "Idempotency token already recorded, counters unchanged"
                );
                return Ok(CounterUpdate {
                    applied: false,
                    counters: counters_of(&model),
                });
            }
            return Err(e.into());
        }

        // Counters and the status transition are computed from the row's
        // current values inside one UPDATE, so concurrent updates for
        // different tokens serialize on the campaign row and no increment
        // is lost.
        let backend = self.db.get_database_backend();
        let (sql, values) = if outcome == OUTCOME_SENT {
            match backend {
                sea_orm::DbBackend::Postgres => (
                    r#"
                    UPDATE campaigns
                    SET
                        sent_count = sent_count + 1,
                        sent_at = COALESCE(sent_at, $1),
                        status = CASE
                            WHEN sent_count + failed_count + 1 >= total THEN 'completed'
                            WHEN status = 'queued' THEN 'sending'
                            ELSE status
                        END,
                        updated_at = $2
                    WHERE id = $3
                    "#,
                    vec![now.into(), now.into(), campaign_id.to_string().into()],
                ),
                _ => (
                    r#"
                    UPDATE campaigns
                    SET
                        sent_count = sent_count + 1,
                        sent_at = COALESCE(sent_at, ?),
                        status = CASE
                            WHEN sent_count + failed_count + 1 >= total THEN 'completed'
                            WHEN status = 'queued' THEN 'sending'
                            ELSE status
                        END,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                    vec![now.into(), now.into(), campaign_id.to_string().into()],
                ),
            }
        } else {
            match backend {
                sea_orm::DbBackend::Postgres => (
                    r#"
                    UPDATE campaigns
                    SET
                        failed_count = failed_count + 1,
                        status = CASE
                            WHEN sent_count + failed_count + 1 >= total THEN
                                CASE WHEN sent_count > 0 THEN 'completed' ELSE 'failed' END
                            ELSE status
                        END,
                        updated_at = $1
                    WHERE id = $2
                    "#,
                    vec![now.into(), campaign_id.to_string().into()],
                ),
                _ => (
                    r#"
                    UPDATE campaigns
                    SET
                        failed_count = failed_count + 1,
                        status = CASE
                            WHEN sent_count + failed_count + 1 >= total THEN
                                CASE WHEN sent_count > 0 THEN 'completed' ELSE 'failed' END
                            ELSE status
                        END,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                    vec![now.into(), campaign_id.to_string().into()],
                ),
            }
        };

        let statement = Statement::from_sql_and_values(backend, sql, values);
        txn.execute(statement).await?;

        let updated = campaigns::Entity::find_by_id(campaign_id)
            .one(&txn)
            .await?
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))?;

        txn.commit().await?;

        Ok(CounterUpdate {
            applied: true,
            counters: counters_of(&updated),
        })
    }

    /// Drop campaigns that finished longer than `retention` ago, together
    /// with their attempt ledgers. Returns how many campaigns went away.
    pub async fn cleanup_finished(&self, retention: std::time::Duration) -> Result<u64> {
        use sea_orm::{ColumnTrait, QueryFilter};

        let cutoff = chrono::Utc::now().timestamp_micros() - retention.as_micros() as i64;

        let finished = campaigns::Entity::find()
            .filter(
                campaigns::Column::Status
                    .eq(CampaignStatus::Completed.as_str())
                    .or(campaigns::Column::Status.eq(CampaignStatus::Failed.as_str())),
            )
            .filter(campaigns::Column::UpdatedAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let mut removed = 0;
        for campaign in finished {
            send_attempts::Entity::delete_many()
                .filter(send_attempts::Column::CampaignId.eq(&campaign.id))
                .exec(&*self.db)
                .await?;
            campaigns::Entity::delete_by_id(&campaign.id)
                .exec(&*self.db)
                .await?;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, "Cleaned up finished campaigns");
        }
        Ok(removed)
    }

    pub async fn get_contact(&self, email: &str) -> Result<Option<ContactRecord>> {
        let Some(model) = contacts::Entity::find_by_id(email).one(&*self.db).await? else {
            return Ok(None);
        };

        let extra = match &model.extra {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                tracing::warn!(email, error = %e, "Malformed contact extra fields, ignoring");
                Default::default()
            }),
            None => Default::default(),
        };

        Ok(Some(ContactRecord {
            email: model.email,
            first_name: model.first_name,
            last_name: model.last_name,
            company: model.company,
            agency_name: model.agency_name,
            extra,
        }))
    }

    pub async fn put_contact(&self, contact: &ContactRecord) -> Result<()> {
        let extra = if contact.extra.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&contact.extra)?)
        };
        let active_model = contacts::ActiveModel {
            email: Set(contact.email.clone()),
            first_name: Set(contact.first_name.clone()),
            last_name: Set(contact.last_name.clone()),
            company: Set(contact.company.clone()),
            agency_name: Set(contact.agency_name.clone()),
            extra: Set(extra),
        };

        if contacts::Entity::find_by_id(&contact.email)
            .one(&*self.db)
            .await?
            .is_some()
        {
            active_model.update(&*self.db).await?;
        } else {
            active_model.insert(&*self.db).await?;
        }
        Ok(())
    }
}

fn counters_of(model: &campaigns::Model) -> CampaignCounters {
    CampaignCounters {
        total: model.total.max(0) as u32,
        sent_count: model.sent_count.max(0) as u32,
        failed_count: model.failed_count.max(0) as u32,
        status: CampaignStatus::from(model.status.as_str()),
        sent_at: model.sent_at,
    }
}
