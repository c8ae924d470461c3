use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only ledger of per-item counter updates. The primary key is the
/// work item's idempotency token, so a redelivered item cannot advance the
/// campaign counters twice.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "send_attempts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub token: String,
    pub campaign_id: String,
    pub outcome: String, // "sent" or "failed"
    pub created_at: i64, // Unix epoch microseconds
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
