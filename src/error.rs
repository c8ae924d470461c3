use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("Campaign already exists: {0}")]
    DuplicateCampaign(String),

    #[error("Blob not found: {0}")]
    BlobMissing(String),

    #[error("Blob store error: {0}")]
    Blob(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
