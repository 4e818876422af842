// Address Validation
//
// Minimal shape filter for submitted addresses. This is *not* a
// deliverability check: anything shaped like `local@domain.tld`
// passes.

use serde::{Deserialize, Serialize};

/// An address that passed shape validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidAddress(String);

impl ValidAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Reasons a candidate address is rejected.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum InvalidFormat {
    #[error("Email is required")]
    Missing,

    #[error("Invalid email format")]
    Malformed,
}

/// Validate a candidate address.
///
/// Accepts `^[^\s@]+@[^\s@]+\.[^\s@]+$`. Input is not trimmed, so
/// surrounding whitespace is malformed.
pub fn validate(candidate: &str) -> Result<ValidAddress, InvalidFormat> {
    if candidate.is_empty() {
        return Err(InvalidFormat::Missing);
    }

    if candidate.chars().any(char::is_whitespace) {
        return Err(InvalidFormat::Malformed);
    }

    let (local, domain) = candidate.split_once('@').ok_or(InvalidFormat::Malformed)?;
    if local.is_empty() || domain.contains('@') {
        return Err(InvalidFormat::Malformed);
    }

    if !has_dotted_suffix(domain) {
        return Err(InvalidFormat::Malformed);
    }

    Ok(ValidAddress(candidate.to_string()))
}

// Some dot must have at least one char before and after it.
fn has_dotted_suffix(domain: &str) -> bool {
    domain
        .char_indices()
        .filter(|(_, c)| *c == '.')
        .any(|(i, _)| i > 0 && i + 1 < domain.len())
}
