use std::collections::HashSet;

/// Syntactic email check for recipient lists: exactly one `@` with a
/// non-empty local part and domain, no whitespace. Anything the provider
/// rejects beyond that surfaces as a per-item failure at dispatch.
pub fn is_valid_email(address: &str) -> bool {
    if address.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = address.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => !local.is_empty() && !domain.is_empty(),
        _ => false,
    }
}

/// Lowercase, trim, and de-duplicate one address list, keeping first
/// occurrence order.
pub fn normalize_addresses(addresses: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(addresses.len());
    for address in addresses {
        let address = address.trim().to_lowercase();
        if seen.insert(address.clone()) {
            normalized.push(address);
        }
    }
    normalized
}
