//! Envelope address types and compliance checks.

use std::str::FromStr;

use crate::error::{Error, Result};

/// Cleans a `MAIL FROM` / `RCPT TO` argument.
///
/// Everything after the first NUL (ESMTP parameters) is dropped, then
/// surrounding whitespace and angle brackets are removed.
#[must_use]
pub fn clean_address(raw: &str) -> String {
    let addr = raw.split('\0').next().unwrap_or_default().trim();
    let addr = addr.strip_prefix('<').unwrap_or(addr);
    let addr = addr.strip_suffix('>').unwrap_or(addr);
    addr.trim().to_string()
}

/// Syntax policy applied to envelope addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressPolicy {
    /// RFC 5321-ish local part and a hostname or address literal domain.
    #[default]
    Default,
    /// Any local part without `@`, whitespace or control characters.
    LazyLocalPart,
}

impl FromStr for AddressPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "lazylocalpart" => Ok(Self::LazyLocalPart),
            other => Err(Error::InvalidAddress(format!(
                "unknown compliance checker: {other}"
            ))),
        }
    }
}

impl AddressPolicy {
    /// Returns true if `addr` passes this policy.
    #[must_use]
    pub fn is_valid(self, addr: &str) -> bool {
        self.check(addr).is_ok()
    }

    /// Validates `addr` against this policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] describing the first violation.
    pub fn check(self, addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        let Some((local, domain)) = addr.rsplit_once('@') else {
            return Err(Error::InvalidAddress("Address must contain @".into()));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(
                "Local and domain parts cannot be empty".into(),
            ));
        }

        let local_ok = match self {
            Self::Default => strict_local_part(local),
            Self::LazyLocalPart => lazy_local_part(local),
        };
        if !local_ok {
            return Err(Error::InvalidAddress(format!("Bad local part: {local}")));
        }

        if !valid_domain(domain) {
            return Err(Error::InvalidAddress(format!("Bad domain: {domain}")));
        }

        Ok(())
    }
}

const SPECIALS: &[char] = &['<', '>', '(', ')', '[', ']', '\\', ',', ';', ':', '"', '@'];

fn strict_local_part(local: &str) -> bool {
    if local.len() >= 2 && local.starts_with('"') && local.ends_with('"') {
        let inner = &local[1..local.len() - 1];
        return !inner.chars().any(|c| c.is_control() || c == '"');
    }
    !local
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || SPECIALS.contains(&c))
}

fn lazy_local_part(local: &str) -> bool {
    !local
        .chars()
        .any(|c| c == '@' || c.is_whitespace() || c.is_control())
}

fn valid_domain(domain: &str) -> bool {
    if let Some(literal) = domain.strip_prefix('[') {
        return literal.strip_suffix(']').is_some_and(|inner| {
            !inner.is_empty() && !inner.chars().any(|c| c.is_whitespace() || c == '[' || c == ']')
        });
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
