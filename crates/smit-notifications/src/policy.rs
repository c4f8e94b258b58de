//! Selection Policy
//!
//! Which entries produce mail, to whom, and how strictly it must be
//! encrypted.

use serde::{Deserialize, Serialize};

use crate::directory::RecipientDirectory;
use crate::event::{EventRecord, PropertyValue};
use crate::recipient::{KeyRef, Recipient, RecipientSet};

/// What to do when recipients lack a public key or encryption fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// Encrypt when every recipient has a key, otherwise send in clear text.
    /// Encryption failures fall back to clear text. Both are logged.
    #[default]
    Lenient,
    /// Every recipient must have a key and encryption must succeed.
    Strict,
    /// Encrypt with whatever keys exist; never send clear text.
    Forced,
}

/// Notification policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionPolicy {
    /// Notify only when one of these properties was modified (empty = always)
    pub trigger_properties: Vec<String>,
    /// Send to the project administrators
    pub admins: bool,
    /// Send to the users named by this property
    pub designee_property: Option<String>,
    /// Literal addresses, not translated through the directory
    pub explicit: Vec<String>,
    /// Send to the recipients listed in the payload
    pub event_recipients: bool,
    pub encryption: EncryptionMode,
    /// Query the local keyring for recipients without a known key
    pub keyring_lookup: bool,
}

impl SelectionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger_on<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_properties = properties.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_admins(mut self) -> Self {
        self.admins = true;
        self
    }

    pub fn designee(mut self, property: impl Into<String>) -> Self {
        self.designee_property = Some(property.into());
        self
    }

    pub fn to<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.explicit = addresses.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_event_recipients(mut self) -> Self {
        self.event_recipients = true;
        self
    }

    pub fn encryption(mut self, mode: EncryptionMode) -> Self {
        self.encryption = mode;
        self
    }

    pub fn keyring_lookup(mut self, enabled: bool) -> Self {
        self.keyring_lookup = enabled;
        self
    }

    /// True if at least one recipient source is enabled
    pub fn has_sources(&self) -> bool {
        self.admins
            || self.designee_property.is_some()
            || !self.explicit.is_empty()
            || self.event_recipients
    }

    /// Whether the event deserves a notification
    pub fn should_notify(&self, event: &EventRecord) -> bool {
        self.trigger_properties.is_empty()
            || self
                .trigger_properties
                .iter()
                .any(|property| event.is_modified(property))
    }

    /// Union of the recipients of every enabled source.
    ///
    /// Unknown users and empty values only mean "no recipient from this
    /// source". Recipients without a key get the directory's key, if any.
    pub fn resolve_recipients(
        &self,
        event: &EventRecord,
        directory: &RecipientDirectory,
    ) -> RecipientSet {
        let mut recipients = RecipientSet::new();

        if self.admins {
            for user in event.admins() {
                match directory.address_of(user) {
                    Some(email) => {
                        recipients.insert(Recipient::new(email));
                    }
                    None => tracing::debug!(user, "No address for admin, skipped"),
                }
            }
        }

        if let Some(property) = &self.designee_property {
            let designees = event
                .property_value(property)
                .map(PropertyValue::values)
                .unwrap_or_default();
            if designees.is_empty() {
                tracing::debug!(property = %property, "Designee property has no value");
            }
            for designee in designees.into_iter().filter(|d| !d.trim().is_empty()) {
                match directory.address_of(designee) {
                    Some(email) => {
                        recipients.insert(Recipient::new(email));
                    }
                    None => tracing::debug!(
                        property = %property,
                        designee,
                        "No address for designee, skipped"
                    ),
                }
            }
        }

        recipients.extend(self.explicit.iter().map(Recipient::new));

        if self.event_recipients {
            for inline in &event.recipients {
                let Some(email) = inline.email.as_deref() else {
                    tracing::debug!("Payload recipient without email, skipped");
                    continue;
                };
                let mut recipient = Recipient::new(email);
                if let Some(block) = inline.gpg_pub_key.as_deref() {
                    if !block.trim().is_empty() {
                        recipient = recipient.with_key(KeyRef::Armored(block.to_string()));
                    }
                }
                recipients.insert(recipient);
            }
        }

        for recipient in recipients.iter_mut().filter(|r| r.key.is_none()) {
            if let Some(key_id) = directory.key_of(&recipient.email) {
                recipient.key = Some(KeyRef::Id(key_id.to_string()));
            }
        }

        tracing::debug!(
            recipients = ?recipients.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Resolved recipients"
        );
        recipients
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> EventRecord {
        EventRecord::parse(
            r#"{
                "project": "myproject",
                "issue": "345",
                "users": {"fred": "admin", "alice": "ro", "bob": "admin", "ghost": "admin"},
                "modified": ["assignee"],
                "properties": {
                    "summary": ["Title", "segfault at startup"],
                    "assignee": ["Assignee", "alice"],
                    "reviewers": ["Reviewers", ["bob", "carol", "nobody"]]
                },
                "recipients": [
                    {"email": "dave@example.com", "gpg_pub_key": "-----BEGIN PGP PUBLIC KEY BLOCK-----"},
                    {"email": "erin@example.com", "gpg_pub_key": "  "},
                    {"gpg_pub_key": null}
                ]
            }"#,
        )
        .unwrap()
    }

    fn directory() -> RecipientDirectory {
        RecipientDirectory::new()
            .with_address("fred", "fred@example.com")
            .with_address("alice", "alice@example.com")
            .with_address("bob", "bob@example.com")
            .with_address("carol", "carol@example.com")
            .with_key("bob@example.com", "B0B0B0B0")
    }

    #[test]
    fn test_should_notify_without_triggers() {
        assert!(SelectionPolicy::new().should_notify(&event()));
    }

    #[test]
    fn test_should_notify_with_matching_trigger() {
        let policy = SelectionPolicy::new().trigger_on(["status", "assignee"]);
        assert!(policy.should_notify(&event()));
    }

    #[test]
    fn test_should_not_notify_with_disjoint_triggers() {
        let policy = SelectionPolicy::new().trigger_on(["status"]);
        assert!(!policy.should_notify(&event()));
    }

    #[test]
    fn test_admins_skip_unknown_users() {
        let recipients = SelectionPolicy::new()
            .with_admins()
            .resolve_recipients(&event(), &directory());
        assert_eq!(
            recipients.addresses(),
            vec!["fred@example.com", "bob@example.com"]
        );
    }

    #[test]
    fn test_designee_single_and_multiple() {
        let single = SelectionPolicy::new()
            .designee("assignee")
            .resolve_recipients(&event(), &directory());
        assert_eq!(single.addresses(), vec!["alice@example.com"]);

        let multiple = SelectionPolicy::new()
            .designee("reviewers")
            .resolve_recipients(&event(), &directory());
        assert_eq!(
            multiple.addresses(),
            vec!["bob@example.com", "carol@example.com"]
        );
    }

    #[test]
    fn test_missing_designee_property_yields_nothing() {
        let recipients = SelectionPolicy::new()
            .designee("owner")
            .resolve_recipients(&event(), &directory());
        assert!(recipients.is_empty());
    }

    #[test]
    fn test_overlapping_sources_are_deduplicated() {
        let recipients = SelectionPolicy::new()
            .with_admins()
            .designee("reviewers")
            .to(["BOB@example.com", "fred@example.com", "zoe@example.com", "zoe at example"])
            .resolve_recipients(&event(), &directory());

        assert_eq!(
            recipients.addresses(),
            vec![
                "fred@example.com",
                "bob@example.com",
                "carol@example.com",
                "zoe@example.com"
            ]
        );
    }

    #[test]
    fn test_directory_keys_are_attached() {
        let recipients = SelectionPolicy::new()
            .with_admins()
            .resolve_recipients(&event(), &directory());
        let bob = recipients
            .iter()
            .find(|r| r.email == "bob@example.com")
            .unwrap();
        assert_eq!(bob.key, Some(KeyRef::Id("B0B0B0B0".into())));
        let fred = recipients
            .iter()
            .find(|r| r.email == "fred@example.com")
            .unwrap();
        assert!(fred.key.is_none());
    }

    #[test]
    fn test_event_recipients() {
        let recipients = SelectionPolicy::new()
            .with_event_recipients()
            .resolve_recipients(&event(), &directory());

        let all: Vec<&Recipient> = recipients.iter().collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].email, "dave@example.com");
        assert!(matches!(all[0].key, Some(KeyRef::Armored(_))));
        assert_eq!(all[1].email, "erin@example.com");
        assert!(all[1].key.is_none());
    }

    #[test]
    fn test_empty_users_admins_only() {
        let event = EventRecord::parse(r#"{"project": "p", "issue": "1", "users": {}}"#).unwrap();
        let recipients = SelectionPolicy::new()
            .with_admins()
            .resolve_recipients(&event, &directory());
        assert!(recipients.is_empty());
    }
}
