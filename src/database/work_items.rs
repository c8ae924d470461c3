use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One queued "send this campaign to this address in this role" unit. Rows
/// with `visible_at` in the past are claimable; a claim stamps a fresh
/// receipt and pushes `visible_at` forward, hiding the row until the
/// visibility timeout elapses or the claimer acks.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "work_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub campaign_id: String,
    pub recipient_address: String,
    pub role: Option<String>, // "to" | "cc" | "bcc"; NULL means regular
    pub idempotency_token: String,
    pub visible_at: i64, // Unix epoch microseconds
    pub receive_count: i32,
    pub receipt: Option<String>,
    pub created_at: i64, // Unix epoch microseconds
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
