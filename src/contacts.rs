//! Trusted contacts: validation, formatting, and routing classification.
//!
//! A contact's `detail` is a phone number, an `@handle`, or an email,
//! validated at write time. Classification feeds the notifier, which only
//! ever dispatches to handles and pre-authorized phones.

use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Opaque contact identifier (store-generated key).
pub type ContactId = String;

/// A trusted contact registered by the user, read-only to the session core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedContact {
    pub name: String,
    /// Phone number, `@handle`, or email; kept as entered (mask included).
    pub detail: String,
}

impl TrustedContact {
    /// Builds a contact, rejecting empty names and unrecognizable details.
    pub fn new(name: impl Into<String>, detail: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let detail = detail.into();
        if name.trim().is_empty() {
            bail!("contact name must not be empty");
        }
        if classify_detail(&detail).is_none() {
            bail!(
                "invalid contact detail '{}': expected a phone (10/11 digits), an @handle, or an email",
                detail
            );
        }
        Ok(Self { name, detail })
    }

    pub fn kind(&self) -> Option<ContactKind> {
        classify_detail(&self.detail)
    }
}

/// What a contact detail turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactKind {
    /// Messenger-style handle, stored with the leading `@` stripped.
    Handle(String),
    /// Phone number reduced to its digits.
    Phone(String),
    /// Email address; valid to store but never dispatched by the relay.
    Email(String),
}

/// Strips everything but ASCII digits.
pub fn digits_only(detail: &str) -> String {
    detail.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Phone validity: 10 or 11 digits once stripped (local convention with or
/// without the extra mobile digit).
pub fn is_valid_phone(detail: &str) -> bool {
    let digits = digits_only(detail);
    digits.len() == 10 || digits.len() == 11
}

/// Handle validity: `@` followed by at least one character.
pub fn is_valid_handle(detail: &str) -> bool {
    detail.starts_with('@') && detail.len() > 1
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"))
}

pub fn is_valid_email(detail: &str) -> bool {
    email_regex().is_match(&detail.to_lowercase())
}

/// Classifies a detail string, or `None` when it matches nothing we accept.
///
/// Handle wins over email: anything starting with `@` is a handle even
/// though emails also contain `@`.
pub fn classify_detail(detail: &str) -> Option<ContactKind> {
    let detail = detail.trim();
    if is_valid_handle(detail) {
        return Some(ContactKind::Handle(
            detail.trim_start_matches('@').to_string(),
        ));
    }
    if !detail.contains('@') && is_valid_phone(detail) {
        return Some(ContactKind::Phone(digits_only(detail)));
    }
    if is_valid_email(detail) {
        return Some(ContactKind::Email(detail.to_string()));
    }
    None
}

/// Formats raw phone input as `(DD) NNNN-NNNN` / `(DD) NNNNN-NNNN` while the
/// user types. Input helper only; stored details keep whatever the user
/// submitted.
pub fn mask_phone(input: &str) -> String {
    let digits: String = digits_only(input).chars().take(11).collect();
    let d: Vec<char> = digits.chars().collect();
    match d.len() {
        0 => String::new(),
        1..=2 => format!("({}", digits),
        3..=6 => format!("({}{}) {}", d[0], d[1], d[2..].iter().collect::<String>()),
        7..=10 => {
            let body: String = d[2..].iter().collect();
            let split = body.len() - 4;
            format!(
                "({}{}) {}-{}",
                d[0],
                d[1],
                body.chars().take(split).collect::<String>(),
                body.chars().skip(split).collect::<String>()
            )
        }
        _ => {
            let body: String = d[2..].iter().collect();
            format!(
                "({}{}) {}-{}",
                d[0],
                d[1],
                body.chars().take(5).collect::<String>(),
                body.chars().skip(5).collect::<String>()
            )
        }
    }
}
