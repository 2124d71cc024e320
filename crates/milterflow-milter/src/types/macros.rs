//! Macro dictionary sent by the MTA along with each command.

use std::collections::HashMap;

/// Macro values (`SMFIC_MACRO`), keyed by name without braces.
///
/// `{auth_authen}` and `auth_authen` address the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Macros(HashMap<String, String>);

impl Macros {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a macro, normalizing the key.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(normalize(key).to_string(), value.into());
    }

    /// Looks up a macro by name (braces optional).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(normalize(key)).map(String::as_str)
    }

    /// Looks up a macro, treating an empty value as missing.
    #[must_use]
    pub fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Merges another dictionary into this one, later values win.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Number of macros.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no macros.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Macros {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut macros = Self::new();
        for (k, v) in iter {
            macros.insert(k.as_ref(), v);
        }
        macros
    }
}

fn normalize(key: &str) -> &str {
    key.strip_prefix('{')
        .and_then(|k| k.strip_suffix('}'))
        .unwrap_or(key)
}
