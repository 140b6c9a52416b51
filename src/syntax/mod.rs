//! Pre-flight email address validation.
//!
//! A deliberately conservative ASCII subset of RFC 5321/5322: quoted local
//! parts, IP-literal domains, and internationalized addresses are rejected
//! outright rather than half-supported. The pipeline never touches DNS or
//! the network for an address this module refuses.

use serde::{Deserialize, Serialize};

/// Outcome of syntax validation. `domain` is present iff `valid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxResult {
    pub valid: bool,
    pub message: String,
    pub domain: Option<String>,
}

impl SyntaxResult {
    fn success(domain: &str) -> Self {
        SyntaxResult {
            valid: true,
            message: "Syntax OK".to_string(),
            domain: Some(domain.to_string()),
        }
    }

    fn failure(reason: &str) -> Self {
        SyntaxResult {
            valid: false,
            message: reason.to_string(),
            domain: None,
        }
    }
}

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

// RFC 5321 atext specials allowed in an unquoted local part.
const LOCAL_SPECIALS: &[u8] = b"!#$%&'*+/=?^_`{|}~.-";

/// Validates `address` and extracts its domain.
pub fn validate(address: &str) -> SyntaxResult {
    if address.is_empty() {
        return SyntaxResult::failure("Address is empty");
    }
    if !address.is_ascii() {
        return SyntaxResult::failure("Address contains non-ASCII characters");
    }
    if address.len() > MAX_ADDRESS_LEN {
        return SyntaxResult::failure("Address exceeds 254 characters");
    }

    let mut parts = address.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        (_, None, _) => return SyntaxResult::failure("Address must contain an '@' separator"),
        _ => return SyntaxResult::failure("Address must contain exactly one '@'"),
    };

    if let Some(reason) = check_local_part(local) {
        return SyntaxResult::failure(reason);
    }
    if let Some(reason) = check_domain(domain) {
        return SyntaxResult::failure(reason);
    }

    SyntaxResult::success(domain)
}

fn check_local_part(local: &str) -> Option<&'static str> {
    if local.is_empty() {
        return Some("Local part is empty");
    }
    if local.len() > MAX_LOCAL_LEN {
        return Some("Local part exceeds 64 characters");
    }
    if local.starts_with('.') || local.ends_with('.') {
        return Some("Local part must not start or end with a dot");
    }
    if local.contains("..") {
        return Some("Local part must not contain consecutive dots");
    }
    for byte in local.bytes() {
        if !byte.is_ascii_alphanumeric() && !LOCAL_SPECIALS.contains(&byte) {
            return Some("Local part contains a disallowed character");
        }
    }
    None
}

fn check_domain(domain: &str) -> Option<&'static str> {
    if domain.is_empty() {
        return Some("Domain is empty");
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Some("Domain exceeds 253 characters");
    }
    if domain.starts_with('[') || domain.ends_with(']') {
        return Some("IP-literal domains are not supported");
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return Some("Domain must not start or end with a dot");
    }

    let labels: Vec<&str> = domain.split('.').collect();
    for label in &labels {
        if label.is_empty() {
            return Some("Domain contains an empty label");
        }
        if label.len() > MAX_LABEL_LEN {
            return Some("Domain label exceeds 63 characters");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Some("Domain label must not start or end with '-'");
        }
        if label.bytes().any(|b| !b.is_ascii_alphanumeric() && b != b'-') {
            return Some("Domain label contains a disallowed character");
        }
    }

    // The final label is the TLD: at least two characters, letters only.
    // `labels` is non-empty since `domain` is non-empty.
    let tld = labels[labels.len() - 1];
    if tld.len() < 2 || tld.bytes().any(|b| !b.is_ascii_alphabetic()) {
        return Some("Top-level domain must be at least two letters");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_addresses() {
        for address in [
            "alice@example.com",
            "first.last@sub.example.co",
            "user+tag@example.org",
            "o'brien@example.ie",
            "x_y-z@ex-ample.com",
            "1234@numbers.example",
        ] {
            let result = validate(address);
            assert!(result.valid, "{address} should be valid: {}", result.message);
        }
    }

    #[test]
    fn extracted_domain_matches_input() {
        let result = validate("alice@Example.COM");
        assert!(result.valid);
        assert_eq!(result.domain.as_deref(), Some("Example.COM"));
    }

    #[test]
    fn rejects_missing_or_repeated_at() {
        assert!(!validate("no-at-symbol").valid);
        assert!(!validate("two@@example.com").valid);
        assert!(!validate("a@b@example.com").valid);
    }

    #[test]
    fn rejects_bad_local_parts() {
        assert!(!validate("@example.com").valid);
        assert!(!validate(".leading@example.com").valid);
        assert!(!validate("trailing.@example.com").valid);
        assert!(!validate("dou..ble@example.com").valid);
        assert!(!validate("spa ce@example.com").valid);
        assert!(!validate(&format!("{}@example.com", "a".repeat(65))).valid);
    }

    #[test]
    fn rejects_bad_domains() {
        assert!(!validate("user@").valid);
        assert!(!validate("user@.example.com").valid);
        assert!(!validate("user@example.com.").valid);
        assert!(!validate("user@exa..mple.com").valid);
        assert!(!validate("user@-example.com").valid);
        assert!(!validate("user@example-.com").valid);
        assert!(!validate("user@example.c").valid);
        assert!(!validate("user@example.c0m").valid);
        assert!(!validate("user@[127.0.0.1]").valid);
        assert!(!validate(&format!("user@{}.com", "a".repeat(64))).valid);
    }

    #[test]
    fn rejects_non_ascii_and_oversize() {
        assert!(!validate("grüße@example.com").valid);
        assert!(!validate("user@exämple.com").valid);

        let long_domain = format!("user@{}.example.com", "a.".repeat(120));
        assert!(!validate(&long_domain).valid);
    }

    #[test]
    fn failure_carries_no_domain() {
        let result = validate("no-at-symbol");
        assert!(!result.valid);
        assert_eq!(result.domain, None);
        assert!(!result.message.is_empty());
    }
}
