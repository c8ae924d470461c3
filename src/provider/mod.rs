pub mod smtp;

pub use smtp::SmtpProvider;

use async_trait::async_trait;
use thiserror::Error;

/// Classified failure from the mail provider. `code` carries the provider's
/// own error code when one is available; classification (throttle vs
/// permanent vs transient) happens over `code` and `message` downstream.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Message rejected by provider: {message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },

    #[error("Provider transport error: {message}")]
    Transport {
        code: Option<String>,
        message: String,
    },

    #[error("Invalid outgoing message: {message}")]
    InvalidMessage { message: String },
}

impl ProviderError {
    pub fn rejected(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn transport(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            code,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } | Self::Transport { code, .. } => code.as_deref(),
            Self::InvalidMessage { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Rejected { message, .. }
            | Self::Transport { message, .. }
            | Self::InvalidMessage { message } => message,
        }
    }
}

/// Header-visible address lists of one outgoing message. The envelope (the
/// actual delivery targets) is carried separately: for solo Cc/Bcc sends the
/// two deliberately disagree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderAddresses {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

/// A send for which the provider constructs the MIME itself. Used when the
/// message carries no attachments.
#[derive(Debug, Clone)]
pub struct SimpleSend {
    pub from_address: String,
    pub headers: HeaderAddresses,
    pub envelope: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// A send with caller-constructed MIME bytes.
#[derive(Debug, Clone)]
pub struct RawSend {
    pub from_address: String,
    pub envelope: Vec<String>,
    pub mime: Vec<u8>,
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Send a message without attachments; the provider builds the MIME.
    async fn send_simple(&self, send: &SimpleSend) -> Result<String, ProviderError>;

    /// Send pre-composed MIME bytes to the given envelope recipients.
    async fn send_raw(&self, send: &RawSend) -> Result<String, ProviderError>;
}
