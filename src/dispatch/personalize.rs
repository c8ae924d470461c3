use crate::campaign::ContactRecord;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

const STANDARD_FIELDS: &[&str] = &["first_name", "last_name", "email", "company", "agency_name"];

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap())
}

/// Substitution map for one recipient. The standard recipient fields are
/// always present (empty when there is no contact row, per the solo-Cc/Bcc
/// address case); extra contact fields ride along; anything else stays a
/// literal placeholder.
pub fn contact_fields(
    recipient: &str,
    contact: Option<&ContactRecord>,
) -> HashMap<String, String> {
    let mut fields = HashMap::new();

    if let Some(contact) = contact {
        for (key, value) in &contact.extra {
            fields.insert(key.clone(), value.clone());
        }
        fields.insert(
            "first_name".to_string(),
            contact.first_name.clone().unwrap_or_default(),
        );
        fields.insert(
            "last_name".to_string(),
            contact.last_name.clone().unwrap_or_default(),
        );
        fields.insert(
            "company".to_string(),
            contact.company.clone().unwrap_or_default(),
        );
        fields.insert(
            "agency_name".to_string(),
            contact.agency_name.clone().unwrap_or_default(),
        );
    } else {
        for field in STANDARD_FIELDS {
            fields.insert(field.to_string(), String::new());
        }
    }

    fields.insert("email".to_string(), recipient.to_string());
    fields
}

/// Replace `{{field}}` placeholders from the field map. Unknown placeholders
/// are left literal.
pub fn personalize(text: &str, fields: &HashMap<String, String>) -> String {
    placeholder_regex()
        .replace_all(text, |caps: &Captures| {
            fields
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
