pub mod error;

pub use error::IntakeError;

use crate::blob::BlobStore;
use crate::campaign::{
    Campaign, CampaignStatus, CampaignStore, CampaignSubmission, Role, WorkItem,
};
use crate::error::EngineError;
use crate::queue::WorkQueue;
use crate::utils::validation::{is_valid_email, normalize_addresses};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Hard ceiling the provider enforces on one composed message (body plus
/// attachments).
pub const MAX_MESSAGE_SIZE_BYTES: usize = 40 * 1024 * 1024;

/// Validates a campaign submission, persists the campaign record, and fans
/// it out into per-recipient work items with role tags. An address placed
/// explicitly on To/Cc/Bcc never also gets a regular copy: the regular set
/// is computed by subtraction, so the queue content itself carries the
/// de-duplication.
pub struct IntakeService {
    store: Arc<CampaignStore>,
    queue: Arc<WorkQueue>,
    blobs: Arc<dyn BlobStore>,
}

impl IntakeService {
    pub fn new(store: Arc<CampaignStore>, queue: Arc<WorkQueue>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            queue,
            blobs,
        }
    }

    /// Accept a submission and return the new campaign id once the campaign
    /// record is persisted and every work item is queued. Validation
    /// failures leave no state behind; a failure during enqueue rolls the
    /// campaign back and surfaces a retryable error.
    pub async fn submit(&self, submission: CampaignSubmission) -> Result<String, IntakeError> {
        let campaign_id = Uuid::now_v7().to_string();

        if submission.subject.trim().is_empty() {
            return Err(IntakeError::EmptySubject);
        }
        let from_address = submission.from_address.trim().to_lowercase();
        if !is_valid_email(&from_address) || !validator::validate_email(&from_address) {
            return Err(IntakeError::InvalidFromAddress(
                submission.from_address.clone(),
            ));
        }

        let target_emails = normalize_addresses(&submission.target_emails);
        let to = normalize_addresses(&submission.to);
        let cc = normalize_addresses(&submission.cc);
        let bcc = normalize_addresses(&submission.bcc);

        for address in target_emails.iter().chain(&to).chain(&cc).chain(&bcc) {
            if !is_valid_email(address) {
                return Err(IntakeError::InvalidAddress(address.clone()));
            }
        }

        if target_emails.is_empty() && to.is_empty() && cc.is_empty() && bcc.is_empty() {
            return Err(IntakeError::NoRecipients);
        }

        self.check_composed_size(&submission).await?;

        // Addresses explicitly placed on To/Cc/Bcc drop out of the regular
        // set; they receive their role copy only.
        let explicit: HashSet<&String> = to.iter().chain(&cc).chain(&bcc).collect();
        let regular: Vec<String> = target_emails
            .iter()
            .filter(|address| !explicit.contains(address))
            .cloned()
            .collect();

        let total = (regular.len() + to.len() + cc.len() + bcc.len()) as u32;
        let status = if total == 0 {
            CampaignStatus::Completed
        } else {
            CampaignStatus::Queued
        };

        let campaign = Campaign {
            id: campaign_id.clone(),
            campaign_name: submission.campaign_name,
            subject: submission.subject,
            body_html: submission.body_html,
            from_address,
            launched_by: submission.launched_by,
            to: to.clone(),
            cc: cc.clone(),
            bcc: bcc.clone(),
            target_emails,
            attachments: submission.attachments,
            total,
            sent_count: 0,
            failed_count: 0,
            status,
            sent_at: None,
            created_at: chrono::Utc::now().timestamp_micros(),
        };

        self.store.create(&campaign).await?;

        let mut items = Vec::with_capacity(total as usize);
        items.extend(regular.iter().map(|address| work_item(&campaign_id, address, None)));
        items.extend(to.iter().map(|address| work_item(&campaign_id, address, Some(Role::To))));
        items.extend(cc.iter().map(|address| work_item(&campaign_id, address, Some(Role::Cc))));
        items.extend(bcc.iter().map(|address| work_item(&campaign_id, address, Some(Role::Bcc))));

        if let Err(e) = self.queue.enqueue(&items).await {
            tracing::error!(
                campaign_id = %campaign_id,
                error = %e,
                "Enqueue failed, rolling campaign back"
            );
            if let Err(purge_err) = self.queue.purge_campaign(&campaign_id).await {
                tracing::error!(
                    campaign_id = %campaign_id,
                    error = %purge_err,
                    "Failed to purge partially enqueued items"
                );
            }
            if let Err(delete_err) = self.store.delete(&campaign_id).await {
                tracing::error!(
                    campaign_id = %campaign_id,
                    error = %delete_err,
                    "Failed to delete campaign during rollback"
                );
            }
            return Err(IntakeError::Store(e));
        }

        tracing::info!(
            campaign_id = %campaign_id,
            total,
            regular = regular.len(),
            to = to.len(),
            cc = cc.len(),
            bcc = bcc.len(),
            "Campaign accepted"
        );
        Ok(campaign_id)
    }

    /// Every referenced blob must exist, and body plus attachments must fit
    /// the provider's message ceiling.
    async fn check_composed_size(&self, submission: &CampaignSubmission) -> Result<(), IntakeError> {
        let mut composed = submission.body_html.len();
        for attachment in &submission.attachments {
            let blob = self.blobs.get(&attachment.blob_key).await.map_err(|e| {
                match e {
                    EngineError::BlobMissing(key) => IntakeError::MissingBlob(key),
                    other => IntakeError::Store(other),
                }
            })?;
            composed += blob.bytes.len();
        }

        if composed > MAX_MESSAGE_SIZE_BYTES {
            return Err(IntakeError::MessageTooLarge {
                size: composed,
                max: MAX_MESSAGE_SIZE_BYTES,
            });
        }
        Ok(())
    }
}

fn work_item(campaign_id: &str, address: &str, role: Option<Role>) -> WorkItem {
    WorkItem {
        campaign_id: campaign_id.to_string(),
        recipient_address: address.to_string(),
        role,
        idempotency_token: Uuid::new_v4().to_string(),
    }
}
