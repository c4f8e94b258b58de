//! Event Record
//!
//! The JSON document the tracker writes on the trigger's stdin for every new
//! or modified entry.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Name of the property holding the issue title
pub const SUMMARY_PROPERTY: &str = "summary";

/// Role value marking a project administrator in the `users` map
pub const ADMIN_ROLE: &str = "admin";

/// One issue creation/modification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventRecord {
    /// Project identifier
    pub project: String,
    /// Issue identifier
    #[serde(alias = "issue_id", deserialize_with = "string_or_number")]
    pub issue: String,
    /// Entry identifier
    #[serde(default)]
    pub entry: Option<String>,
    /// Author of the entry
    #[serde(default)]
    pub author: Option<String>,
    /// True when the entry created the issue
    #[serde(rename = "isNew", default)]
    pub is_new: bool,
    /// Properties modified by the entry
    #[serde(default)]
    pub modified: Vec<String>,
    /// Current properties of the issue, in document order
    #[serde(default)]
    pub properties: IndexMap<String, Property>,
    /// Free-text message of the entry
    #[serde(default)]
    pub message: Option<String>,
    /// Files attached by the entry
    #[serde(default)]
    pub files: Vec<String>,
    /// Project users and their role
    #[serde(default)]
    pub users: IndexMap<String, String>,
    /// Snapshot of the issue before the entry
    #[serde(default)]
    pub old_issue: Option<IssueSnapshot>,
    /// Label dictionary, overriding the labels carried by `properties`
    #[serde(default, rename = "properties_labels")]
    pub labels: HashMap<String, String>,
    /// Recipients supplied directly by the server
    #[serde(default)]
    pub recipients: Vec<InlineRecipient>,
}

/// A `[label, value]` pair of the `properties` map
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "(String, PropertyValue)", into = "(String, PropertyValue)")]
pub struct Property {
    pub label: String,
    pub value: PropertyValue,
}

impl From<(String, PropertyValue)> for Property {
    fn from((label, value): (String, PropertyValue)) -> Self {
        Self { label, value }
    }
}

impl From<Property> for (String, PropertyValue) {
    fn from(property: Property) -> Self {
        (property.label, property.value)
    }
}

/// Property value: a single string, or several for multi-select properties
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Single(String),
    Multiple(Vec<String>),
}

impl PropertyValue {
    /// All values, in order
    pub fn values(&self) -> Vec<&str> {
        match self {
            PropertyValue::Single(v) => vec![v.as_str()],
            PropertyValue::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    /// First value, if any
    pub fn first(&self) -> Option<&str> {
        match self {
            PropertyValue::Single(v) => Some(v.as_str()),
            PropertyValue::Multiple(vs) => vs.first().map(String::as_str),
        }
    }

    /// Human-readable form: multiple values are joined with `, `
    pub fn display(&self) -> String {
        self.values().join(", ")
    }
}

/// State of the issue before the entry was applied
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IssueSnapshot {
    #[serde(default)]
    pub properties: IndexMap<String, Vec<String>>,
}

/// Recipient listed in the payload itself
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InlineRecipient {
    #[serde(default)]
    pub email: Option<String>,
    /// Armored public key block
    #[serde(default)]
    pub gpg_pub_key: Option<String>,
}

impl EventRecord {
    /// Parse a payload
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Whether the entry modified `name`
    pub fn is_modified(&self, name: &str) -> bool {
        self.modified.iter().any(|m| m == name)
    }

    pub fn property_value(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name).map(|p| &p.value)
    }

    /// Issue title: current value, else the prior snapshot's value.
    pub fn summary(&self) -> Option<&str> {
        self.property_value(SUMMARY_PROPERTY)
            .and_then(PropertyValue::first)
            .or_else(|| {
                self.old_issue
                    .as_ref()
                    .and_then(|old| old.properties.get(SUMMARY_PROPERTY))
                    .and_then(|values| values.first())
                    .map(String::as_str)
            })
    }

    /// Label of a property: label dictionary, else the label carried by the
    /// property, else the raw name.
    pub fn label_of<'a>(&'a self, name: &'a str) -> &'a str {
        self.labels
            .get(name)
            .map(String::as_str)
            .or_else(|| {
                self.properties
                    .get(name)
                    .map(|p| p.label.as_str())
                    .filter(|label| !label.is_empty())
            })
            .unwrap_or(name)
    }

    /// Usernames whose role is `admin`, in document order
    pub fn admins(&self) -> impl Iterator<Item = &str> {
        self.users
            .iter()
            .filter(|(_, role)| role.as_str() == ADMIN_ROLE)
            .map(|(user, _)| user.as_str())
    }

    /// The entry message, when not blank
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.is_empty())
    }

    /// The author, when known
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref().filter(|a| !a.is_empty())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "project": "things/to do",
        "issue": "42",
        "isNew": false,
        "entry": "e74181f56c9bdcf09f3b9451a2b962ef7c67ae48",
        "author": "fred",
        "users": {"fred": "admin", "alice": "rw", "bob": "admin"},
        "files": ["2e344bf4/t.c"],
        "modified": ["owner", "tags"],
        "properties": {
            "summary": ["Title", "segfault at startup"],
            "owner": ["Owner", "alice"],
            "tags": ["", ["crash", "urgent"]]
        },
        "message": "Please have a look."
    }"#;

    #[test]
    fn test_parse_payload() {
        let event = EventRecord::parse(PAYLOAD).unwrap();
        assert_eq!(event.project, "things/to do");
        assert_eq!(event.issue, "42");
        assert!(!event.is_new);
        assert_eq!(event.author(), Some("fred"));
        assert_eq!(event.files, vec!["2e344bf4/t.c"]);
        assert_eq!(event.message(), Some("Please have a look."));

        let names: Vec<&str> = event.properties.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["summary", "owner", "tags"]);
        assert_eq!(
            event.property_value("tags"),
            Some(&PropertyValue::Multiple(vec!["crash".into(), "urgent".into()]))
        );
    }

    #[test]
    fn test_numeric_issue_id_and_alias() {
        let event = EventRecord::parse(r#"{"project": "p", "issue_id": 130}"#).unwrap();
        assert_eq!(event.issue, "130");
        assert!(event.properties.is_empty());
        assert!(event.users.is_empty());
    }

    #[test]
    fn test_admins_in_document_order() {
        let event = EventRecord::parse(PAYLOAD).unwrap();
        let admins: Vec<&str> = event.admins().collect();
        assert_eq!(admins, vec!["fred", "bob"]);
    }

    #[test]
    fn test_label_fallback_chain() {
        let mut event = EventRecord::parse(PAYLOAD).unwrap();
        assert_eq!(event.label_of("owner"), "Owner");
        // empty label in the pair falls back to the name
        assert_eq!(event.label_of("tags"), "tags");
        assert_eq!(event.label_of("unknown"), "unknown");

        event.labels.insert("owner".into(), "Assigned to".into());
        assert_eq!(event.label_of("owner"), "Assigned to");
    }

    #[test]
    fn test_summary_falls_back_to_old_issue() {
        let event = EventRecord::parse(
            r#"{
                "project": "p", "issue": "1",
                "properties": {"status": ["Status", "open"]},
                "old_issue": {"id": "1", "properties": {"summary": ["older title"]}}
            }"#,
        )
        .unwrap();
        assert_eq!(event.summary(), Some("older title"));

        let bare = EventRecord::parse(r#"{"project": "p", "issue": "1"}"#).unwrap();
        assert_eq!(bare.summary(), None);
    }

    #[test]
    fn test_blank_message_is_absent() {
        let event =
            EventRecord::parse(r#"{"project": "p", "issue": "1", "message": ""}"#).unwrap();
        assert_eq!(event.message(), None);
    }

    #[test]
    fn test_missing_project_is_rejected() {
        assert!(EventRecord::parse(r#"{"issue": "1"}"#).is_err());
        assert!(EventRecord::parse("not json at all").is_err());
    }
}
