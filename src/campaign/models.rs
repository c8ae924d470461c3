use crate::database::campaigns;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a recipient relates to the outgoing message; governs header
/// construction in the dispatch worker. A work item without a role is a
/// regular recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    To,
    Cc,
    Bcc,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "to" => Some(Self::To),
            "cc" => Some(Self::Cc),
            "bcc" => Some(Self::Bcc),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Queued,
    Sending,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for CampaignStatus {
    fn from(s: &str) -> Self {
        match s {
            "sending" => Self::Sending,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }
}

/// One attachment of a campaign, stored by opaque blob key. Inline
/// attachments are delivered as MIME parts referenced by `cid:` from the
/// HTML body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub content_type: String,
    pub blob_key: String,
    #[serde(default)]
    pub inline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// The JSON-shaped campaign submission handed to intake by the front door.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSubmission {
    pub campaign_name: String,
    pub subject: String,
    #[serde(default)]
    pub body_html: String,
    pub from_address: String,
    #[serde(default)]
    pub target_emails: Vec<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub launched_by: String,
}

/// A persisted campaign. `target_emails` is immutable after intake; the
/// counters move only through the store's conditional updates.
#[derive(Debug, Clone, Serialize)]
pub struct Campaign {
    pub id: String,
    pub campaign_name: String,
    pub subject: String,
    pub body_html: String,
    pub from_address: String,
    pub launched_by: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub target_emails: Vec<String>,
    pub attachments: Vec<AttachmentRef>,
    pub total: u32,
    pub sent_count: u32,
    pub failed_count: u32,
    pub status: CampaignStatus,
    pub sent_at: Option<i64>,
    pub created_at: i64,
}

impl Campaign {
    pub fn from_model(model: campaigns::Model) -> Result<Self, EngineError> {
        Ok(Self {
            status: CampaignStatus::from(model.status.as_str()),
            to: serde_json::from_str(&model.to_addresses)?,
            cc: serde_json::from_str(&model.cc_addresses)?,
            bcc: serde_json::from_str(&model.bcc_addresses)?,
            target_emails: serde_json::from_str(&model.target_emails)?,
            attachments: serde_json::from_str(&model.attachments)?,
            id: model.id,
            campaign_name: model.campaign_name,
            subject: model.subject,
            body_html: model.body_html,
            from_address: model.from_address,
            launched_by: model.launched_by,
            total: model.total.max(0) as u32,
            sent_count: model.sent_count.max(0) as u32,
            failed_count: model.failed_count.max(0) as u32,
            sent_at: model.sent_at,
            created_at: model.created_at,
        })
    }

}

/// Wire format of one queued unit of work. Points at the campaign; carries
/// no campaign content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub campaign_id: String,
    pub recipient_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub idempotency_token: String,
}

/// Personalization source row for one recipient address.
#[derive(Debug, Clone, Default)]
pub struct ContactRecord {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub agency_name: Option<String>,
    pub extra: HashMap<String, String>,
}

/// Counter state after a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignCounters {
    pub total: u32,
    pub sent_count: u32,
    pub failed_count: u32,
    pub status: CampaignStatus,
    pub sent_at: Option<i64>,
}

/// Outcome of `update_on_send`/`update_on_fail`: `applied` is false when the
/// idempotency token had already been recorded and nothing moved.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterUpdate {
    pub applied: bool,
    pub counters: CampaignCounters,
}
