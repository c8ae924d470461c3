use crate::config::{SmtpConfig, SmtpSecurity};
use crate::error::EngineError;
use crate::provider::{MailProvider, ProviderError, RawSend, SimpleSend};
use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, Message, SmtpTransport, Transport};
use std::time::Duration;

/// SMTP-backed mail provider. Builds the transport once and reuses its
/// connection pool across sends.
pub struct SmtpProvider {
    transport: SmtpTransport,
}

impl SmtpProvider {
    pub fn new(config: &SmtpConfig) -> Result<Self, EngineError> {
        let mut builder = SmtpTransport::relay(&config.host)
            .map_err(|e| EngineError::Config(format!("Failed to create SMTP relay: {e}")))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_seconds)));

        builder = match config.security {
            SmtpSecurity::None => builder.tls(Tls::None),
            SmtpSecurity::Tls => {
                let tls_params = TlsParameters::new(config.host.clone())
                    .map_err(|e| EngineError::Config(format!("TLS configuration error: {e}")))?;
                builder.tls(Tls::Required(tls_params))
            }
            SmtpSecurity::Ssl => {
                let tls_params = TlsParameters::new(config.host.clone())
                    .map_err(|e| EngineError::Config(format!("TLS configuration error: {e}")))?;
                builder.tls(Tls::Wrapper(tls_params))
            }
        };

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }

    fn envelope(from: &str, recipients: &[String]) -> Result<Envelope, ProviderError> {
        let sender: Address = from
            .parse()
            .map_err(|e| ProviderError::invalid(format!("Invalid from address '{from}': {e}")))?;
        let mut forward = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let address: Address = recipient.parse().map_err(|e| {
                ProviderError::invalid(format!("Invalid envelope recipient '{recipient}': {e}"))
            })?;
            forward.push(address);
        }
        Envelope::new(Some(sender), forward)
            .map_err(|e| ProviderError::invalid(format!("Invalid envelope: {e}")))
    }

    fn classify(e: lettre::transport::smtp::Error) -> ProviderError {
        // Permanent rejections are the recipient's fault; everything else is
        // transport trouble and, when the server said so, a throttle that the
        // message text will reveal to the classifier.
        if e.is_permanent() {
            ProviderError::rejected(None, e.to_string())
        } else {
            ProviderError::transport(None, e.to_string())
        }
    }

    fn dispatch(&self, envelope: &Envelope, mime: &[u8]) -> Result<String, ProviderError> {
        match self.transport.send_raw(envelope, mime) {
            Ok(response) => {
                let message_id = response.message().collect::<Vec<_>>().join(" ");
                tracing::debug!("SMTP accepted message: {}", message_id);
                Ok(message_id)
            }
            Err(e) => {
                tracing::error!("SMTP send error: {}", e);
                Err(Self::classify(e))
            }
        }
    }
}

fn mailbox(address: &str) -> Result<Mailbox, ProviderError> {
    let parsed: Address = address
        .parse()
        .map_err(|e| ProviderError::invalid(format!("Invalid address '{address}': {e}")))?;
    Ok(Mailbox::new(None, parsed))
}

#[async_trait]
impl MailProvider for SmtpProvider {
    async fn send_simple(&self, send: &SimpleSend) -> Result<String, ProviderError> {
        let mut builder = Message::builder().from(mailbox(&send.from_address)?);
        for to in &send.headers.to {
            builder = builder.to(mailbox(to)?);
        }
        for cc in &send.headers.cc {
            builder = builder.cc(mailbox(cc)?);
        }
        for bcc in &send.headers.bcc {
            builder = builder.bcc(mailbox(bcc)?);
        }

        let body = MultiPart::alternative()
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(send.text_body.clone()),
            )
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(send.html_body.clone()),
            );

        let message = builder
            .subject(&send.subject)
            .multipart(body)
            .map_err(|e| ProviderError::invalid(format!("Failed to build message: {e}")))?;

        let envelope = Self::envelope(&send.from_address, &send.envelope)?;
        self.dispatch(&envelope, &message.formatted())
    }

    async fn send_raw(&self, send: &RawSend) -> Result<String, ProviderError> {
        let envelope = Self::envelope(&send.from_address, &send.envelope)?;
        self.dispatch(&envelope, &send.mime)
    }
}
