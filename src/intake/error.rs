use crate::error::EngineError;
use thiserror::Error;

/// Submission failures. Everything except `Store` is a caller error and
/// maps to a 4xx at the front door; `Store` is retryable.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Campaign has no recipients")]
    NoRecipients,

    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("Invalid from address: {0}")]
    InvalidFromAddress(String),

    #[error("Subject must not be empty")]
    EmptySubject,

    #[error("Attachment blob missing: {0}")]
    MissingBlob(String),

    #[error("Composed message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Store error: {0}")]
    Store(#[from] EngineError),
}

impl IntakeError {
    /// Whether the caller may retry the same payload.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
