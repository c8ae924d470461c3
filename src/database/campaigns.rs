use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "campaigns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub campaign_name: String,
    pub subject: String,
    pub body_html: String,
    pub from_address: String,
    pub launched_by: String,
    pub to_addresses: String,  // JSON serialized [String]
    pub cc_addresses: String,  // JSON serialized [String]
    pub bcc_addresses: String, // JSON serialized [String]
    pub target_emails: String, // JSON serialized [String]; immutable after intake
    pub attachments: String,   // JSON serialized [AttachmentRef]
    pub total: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub status: String,
    pub sent_at: Option<i64>, // Unix epoch microseconds, set once at first success
    pub created_at: i64,      // Unix epoch microseconds
    pub updated_at: i64,      // Unix epoch microseconds
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
