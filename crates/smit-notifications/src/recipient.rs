//! Recipients and recipient sets

use std::fmt;

use indexmap::IndexMap;

/// Reference to a public key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyRef {
    /// Key identifier or fingerprint known to a local keyring
    Id(String),
    /// Armored public key block
    Armored(String),
}

/// An email address with an optional public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    pub key: Option<KeyRef>,
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: KeyRef) -> Self {
        self.key = Some(key);
        self
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.has_key() { "gpg" } else { "no-gpg" };
        write!(f, "{}/{}", self.email, key)
    }
}

/// Recipients deduplicated by address.
///
/// Addresses are compared case-insensitively after trimming. The first
/// spelling seen is kept, as is the first key seen for an address.
#[derive(Debug, Clone, Default)]
pub struct RecipientSet {
    inner: IndexMap<String, Recipient>,
}

impl RecipientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipient; returns false if the address was already present.
    /// Blank and malformed addresses are ignored.
    pub fn insert(&mut self, mut recipient: Recipient) -> bool {
        recipient.email = recipient.email.trim().to_string();
        if recipient.email.is_empty() {
            return false;
        }
        if let Err(e) = recipient.email.parse::<lettre::Address>() {
            tracing::debug!(email = %recipient.email, error = %e, "Malformed address, skipped");
            return false;
        }

        let normalized = recipient.email.to_lowercase();
        match self.inner.get_mut(&normalized) {
            Some(existing) => {
                if existing.key.is_none() {
                    existing.key = recipient.key;
                }
                false
            }
            None => {
                self.inner.insert(normalized, recipient);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, email: &str) -> bool {
        self.inner.contains_key(&email.trim().to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipient> {
        self.inner.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Recipient> {
        self.inner.values_mut()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.iter().map(|r| r.email.clone()).collect()
    }
}

impl Extend<Recipient> for RecipientSet {
    fn extend<I: IntoIterator<Item = Recipient>>(&mut self, iter: I) {
        for recipient in iter {
            self.insert(recipient);
        }
    }
}

impl FromIterator<Recipient> for RecipientSet {
    fn from_iter<I: IntoIterator<Item = Recipient>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}
