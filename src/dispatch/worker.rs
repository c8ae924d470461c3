use crate::blob::BlobStore;
use crate::campaign::{Campaign, CampaignStore, Role, WorkItem};
use crate::config::RateConfig;
use crate::dispatch::mime::{self, LoadedAttachment};
use crate::dispatch::personalize::{contact_fields, personalize};
use crate::error::{EngineError, Result};
use crate::metrics::EngineMetrics;
use crate::provider::{MailProvider, RawSend, SimpleSend};
use crate::rate::{self, RateGovernor};
use crate::sanitize::{sanitize, InlineImageRef};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Headroom kept at the end of the invocation budget: once remaining time
/// drops below this, no new items are started and the rest of the batch
/// returns to the queue via visibility timeout.
const BUDGET_RESERVE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum ItemStatus {
    Sent { message_id: String },
    Failed { reason: String },
    /// Not attempted; the invocation budget ran out first.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub campaign_id: String,
    pub recipient_address: String,
    pub role: Option<Role>,
    pub status: ItemStatus,
}

impl ItemOutcome {
    pub fn attempted(&self) -> bool {
        !matches!(self.status, ItemStatus::Deferred)
    }
}

/// Per-item results of one batch invocation. The invocation itself reports
/// success whenever per-item work began, however the items fared.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<ItemOutcome>,
    pub duration: Duration,
}

impl BatchReport {
    pub fn sent(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ItemStatus::Sent { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ItemStatus::Failed { .. }))
            .count()
    }

    pub fn deferred(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ItemStatus::Deferred))
            .count()
    }
}

/// Drains work item batches: loads the campaign, assembles the message per
/// recipient role, sends through the provider under the rate governor, and
/// advances campaign counters through the token-conditional store updates.
pub struct DispatchWorker {
    store: Arc<CampaignStore>,
    blobs: Arc<dyn BlobStore>,
    provider: Arc<dyn MailProvider>,
    metrics: Arc<EngineMetrics>,
    rate_config: RateConfig,
    batch_budget: Duration,
}

impl DispatchWorker {
    pub fn new(
        store: Arc<CampaignStore>,
        blobs: Arc<dyn BlobStore>,
        provider: Arc<dyn MailProvider>,
        metrics: Arc<EngineMetrics>,
        rate_config: RateConfig,
        batch_budget: Duration,
    ) -> Self {
        Self {
            store,
            blobs,
            provider,
            metrics,
            rate_config,
            batch_budget,
        }
    }

    /// Process one received batch sequentially. Per-item errors never
    /// escape the item boundary; the only `Err` is a fatal pre-item failure
    /// (store unreachable), which leaves the batch unacked for redelivery.
    pub async fn process_batch(&self, items: &[WorkItem]) -> Result<BatchReport> {
        let started = Instant::now();

        self.store.ping().await?;

        // Rate state is invocation-local on purpose: the provider's own
        // throttle signals are the only cross-worker coordination.
        let mut governor = RateGovernor::new(self.rate_config.clone());

        let mut outcomes = Vec::with_capacity(items.len());
        let mut deferring = false;
        for item in items {
            if !deferring && started.elapsed() + BUDGET_RESERVE >= self.batch_budget {
                deferring = true;
                tracing::warn!(
                    remaining = items.len() - outcomes.len(),
                    "Invocation budget nearly exhausted, deferring remaining items"
                );
            }
            if deferring {
                outcomes.push(outcome_of(item, ItemStatus::Deferred));
                continue;
            }

            let status = self.process_item(item, &mut governor).await;
            outcomes.push(outcome_of(item, status));
        }

        let duration = started.elapsed();
        self.metrics.record_batch_duration(duration);

        let report = BatchReport { outcomes, duration };
        tracing::info!(
            items = items.len(),
            sent = report.sent(),
            failed = report.failed(),
            deferred = report.deferred(),
            duration_ms = duration.as_millis() as u64,
            "Batch processed"
        );
        Ok(report)
    }

    async fn process_item(&self, item: &WorkItem, governor: &mut RateGovernor) -> ItemStatus {
        let campaign = match self.store.get(&item.campaign_id).await {
            Ok(campaign) => campaign,
            Err(EngineError::CampaignNotFound(_)) => {
                tracing::warn!(
                    campaign_id = %item.campaign_id,
                    recipient = %item.recipient_address,
                    "Campaign vanished between enqueue and dispatch"
                );
                self.metrics.record_failure();
                return ItemStatus::Failed {
                    reason: format!("campaign {} not found", item.campaign_id),
                };
            }
            Err(e) => {
                self.metrics.record_failure();
                return ItemStatus::Failed {
                    reason: format!("campaign load failed: {e}"),
                };
            }
        };

        let (headers, envelope) = mime::headers_for(&campaign, item.role, &item.recipient_address);

        let attachments = match self.load_attachments(&campaign).await {
            Ok(attachments) => attachments,
            Err(e) => return self.fail_item(item, format!("attachment load failed: {e}")).await,
        };

        let contact = match self.store.get_contact(&item.recipient_address).await {
            Ok(contact) => contact,
            Err(e) => return self.fail_item(item, format!("contact load failed: {e}")).await,
        };
        let fields = contact_fields(&item.recipient_address, contact.as_ref());
        let subject = personalize(&campaign.subject, &fields);
        let body = personalize(&campaign.body_html, &fields);

        let inline_refs: Vec<InlineImageRef> = attachments
            .iter()
            .filter(|a| a.inline)
            .filter_map(|a| {
                a.content_id.as_ref().map(|cid| InlineImageRef {
                    blob_key: a.blob_key.clone(),
                    content_id: cid.clone(),
                })
            })
            .collect();
        let html_body = sanitize(&body, &inline_refs);
        let text_body = mime::html_to_text(&html_body);

        let attachment_bytes: u64 = attachments.iter().map(|a| a.bytes.len() as u64).sum();
        if rate::size_multiplier(attachment_bytes) > 1.0 {
            self.metrics.record_attachment_delay();
        }
        tokio::time::sleep(governor.delay_for(attachment_bytes)).await;

        let send_result = if attachments.is_empty() {
            self.provider
                .send_simple(&SimpleSend {
                    from_address: campaign.from_address.clone(),
                    headers,
                    envelope,
                    subject,
                    html_body,
                    text_body,
                })
                .await
        } else {
            match mime::compose(
                &campaign.from_address,
                &headers,
                &subject,
                &html_body,
                &text_body,
                &attachments,
            ) {
                Ok(mime_bytes) => {
                    self.provider
                        .send_raw(&RawSend {
                            from_address: campaign.from_address.clone(),
                            envelope,
                            mime: mime_bytes,
                        })
                        .await
                }
                Err(e) => {
                    return self.fail_item(item, format!("compose failed: {e}")).await;
                }
            }
        };

        match send_result {
            Ok(message_id) => {
                match self
                    .store
                    .update_on_send(&item.campaign_id, &item.idempotency_token)
                    .await
                {
                    Ok(update) if !update.applied => {
                        tracing::debug!(
                            campaign_id = %item.campaign_id,
                            recipient = %item.recipient_address,
                            "Redelivered item, counters already advanced"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(
                            campaign_id = %item.campaign_id,
                            error = %e,
                            "Failed to record successful send"
                        );
                    }
                }
                governor.note_success();
                tracing::info!(
                    campaign_id = %item.campaign_id,
                    recipient = %item.recipient_address,
                    role = item.role.map(|r| r.as_str()).unwrap_or("regular"),
                    "Message sent"
                );
                ItemStatus::Sent { message_id }
            }
            Err(e) => {
                if rate::is_throttle(&e) {
                    governor.note_throttle();
                    self.metrics.record_throttle();
                }
                self.fail_item(item, e.to_string()).await
            }
        }
    }

    async fn load_attachments(&self, campaign: &Campaign) -> Result<Vec<LoadedAttachment>> {
        let mut loaded = Vec::with_capacity(campaign.attachments.len());
        for attachment in &campaign.attachments {
            let blob = self.blobs.get(&attachment.blob_key).await?;
            let content_type = if attachment.content_type.is_empty() {
                blob.content_type
            } else {
                attachment.content_type.clone()
            };
            let content_id = attachment.inline.then(|| {
                attachment
                    .content_id
                    .clone()
                    .unwrap_or_else(|| mime::content_id_for(&campaign.id, &attachment.blob_key))
            });
            loaded.push(LoadedAttachment {
                filename: attachment.filename.clone(),
                content_type,
                blob_key: attachment.blob_key.clone(),
                bytes: blob.bytes,
                inline: attachment.inline,
                content_id,
            });
        }
        Ok(loaded)
    }

    async fn fail_item(&self, item: &WorkItem, reason: String) -> ItemStatus {
        self.metrics.record_failure();
        if let Err(e) = self
            .store
            .update_on_fail(&item.campaign_id, &item.idempotency_token)
            .await
        {
            tracing::error!(
                campaign_id = %item.campaign_id,
                error = %e,
                "Failed to record send failure"
            );
        }
        tracing::error!(
            campaign_id = %item.campaign_id,
            recipient = %item.recipient_address,
            reason = %reason,
            "Work item failed"
        );
        ItemStatus::Failed { reason }
    }
}

fn outcome_of(item: &WorkItem, status: ItemStatus) -> ItemOutcome {
    ItemOutcome {
        campaign_id: item.campaign_id.clone(),
        recipient_address: item.recipient_address.clone(),
        role: item.role,
        status,
    }
}
