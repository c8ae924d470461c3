use crate::campaign::{Campaign, Role};
use crate::error::{EngineError, Result};
use crate::provider::HeaderAddresses;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

/// One attachment with its bytes loaded from the blob store, ready for MIME
/// assembly. Inline attachments carry the content id the body references.
#[derive(Debug, Clone)]
pub struct LoadedAttachment {
    pub filename: String,
    pub content_type: String,
    pub blob_key: String,
    pub bytes: Vec<u8>,
    pub inline: bool,
    pub content_id: Option<String>,
}

/// Deterministic content id for an inline image the submission didn't pin
/// one for. Stable across redeliveries of the same campaign attachment.
pub fn content_id_for(campaign_id: &str, blob_key: &str) -> String {
    let uuid = Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{campaign_id}/{blob_key}").as_bytes(),
    );
    format!("{uuid}@mailfan")
}

/// Header lists and envelope for one work item.
///
/// Explicit Cc/Bcc recipients get a solo message: the sender addresses
/// themself on `To:` and the recipient rides the Cc/Bcc header, with the
/// envelope naming only that recipient. Regular recipients see the
/// campaign's full Cc/Bcc lists in their headers but are still the sole
/// delivery target of their own message.
pub fn headers_for(
    campaign: &Campaign,
    role: Option<Role>,
    recipient: &str,
) -> (HeaderAddresses, Vec<String>) {
    let envelope = vec![recipient.to_string()];
    let headers = match role {
        Some(Role::Cc) => HeaderAddresses {
            to: vec![campaign.from_address.clone()],
            cc: vec![recipient.to_string()],
            bcc: Vec::new(),
        },
        Some(Role::Bcc) => HeaderAddresses {
            to: vec![campaign.from_address.clone()],
            cc: Vec::new(),
            bcc: vec![recipient.to_string()],
        },
        Some(Role::To) => HeaderAddresses {
            to: vec![recipient.to_string()],
            cc: Vec::new(),
            bcc: Vec::new(),
        },
        None => HeaderAddresses {
            to: vec![recipient.to_string()],
            cc: campaign.cc.clone(),
            bcc: campaign.bcc.clone(),
        },
    };
    (headers, envelope)
}

/// Plain-text alternative derived from the sanitized HTML body.
pub fn html_to_text(html: &str) -> String {
    static BREAKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static BLANKS: OnceLock<Regex> = OnceLock::new();

    let breaks = BREAKS.get_or_init(|| Regex::new(r"(?i)<br\s*/?\s*>|</p>|</div>").unwrap());
    let tags = TAGS.get_or_init(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>|<[^>]*>").unwrap());
    let blanks = BLANKS.get_or_init(|| Regex::new(r"\n{3,}").unwrap());

    let text = breaks.replace_all(html, "\n");
    let text = tags.replace_all(&text, "");
    let text = html_escape::decode_html_entities(&text).replace('\u{a0}', " ");
    blanks.replace_all(&text, "\n\n").trim().to_string()
}

fn mailbox(address: &str) -> Result<Mailbox> {
    let parsed: Address = address
        .parse()
        .map_err(|e| EngineError::InvalidInput(format!("Invalid address '{address}': {e}")))?;
    Ok(Mailbox::new(None, parsed))
}

fn part_content_type(content_type: &str) -> Result<ContentType> {
    ContentType::parse(content_type)
        .or_else(|_| ContentType::parse(mime::APPLICATION_OCTET_STREAM.as_ref()))
        .map_err(|e| EngineError::InvalidInput(format!("Invalid content type: {e}")))
}

/// Compose the full MIME message for a send with attachments:
/// multipart/mixed around the content when regular attachments exist,
/// multipart/related around the alternative when inline images exist, and
/// the text+HTML alternative innermost.
pub fn compose(
    from_address: &str,
    headers: &HeaderAddresses,
    subject: &str,
    html_body: &str,
    text_body: &str,
    attachments: &[LoadedAttachment],
) -> Result<Vec<u8>> {
    let mut builder = Message::builder().from(mailbox(from_address)?);
    for to in &headers.to {
        builder = builder.to(mailbox(to)?);
    }
    for cc in &headers.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    for bcc in &headers.bcc {
        builder = builder.bcc(mailbox(bcc)?);
    }

    let alternative = MultiPart::alternative()
        .singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(text_body.to_string()),
        )
        .singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html_body.to_string()),
        );

    let inline: Vec<&LoadedAttachment> = attachments.iter().filter(|a| a.inline).collect();
    let regular: Vec<&LoadedAttachment> = attachments.iter().filter(|a| !a.inline).collect();

    let content = if inline.is_empty() {
        alternative
    } else {
        let mut related = MultiPart::related().multipart(alternative);
        for attachment in inline {
            let content_id = attachment.content_id.clone().ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "Inline attachment '{}' has no content id",
                    attachment.filename
                ))
            })?;
            related = related.singlepart(
                Attachment::new_inline(content_id)
                    .body(attachment.bytes.clone(), part_content_type(&attachment.content_type)?),
            );
        }
        related
    };

    let content = if regular.is_empty() {
        content
    } else {
        let mut mixed = MultiPart::mixed().multipart(content);
        for attachment in regular {
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.bytes.clone(), part_content_type(&attachment.content_type)?),
            );
        }
        mixed
    };

    let message = builder
        .subject(subject)
        .multipart(content)
        .map_err(|e| EngineError::InvalidInput(format!("Failed to build message: {e}")))?;

    Ok(message.formatted())
}
