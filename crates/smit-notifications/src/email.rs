//! Email Rendering and Delivery
//!
//! Plain-text rendering of an entry, the message model and the sender trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smit_core::{ConfigError, NotifyError};
use thiserror::Error;

use crate::event::EventRecord;

/// Line ending used in rendered bodies
pub const EOL: &str = "\r\n";

/// Width of the horizontal rule separating body blocks
pub const RULE_WIDTH: usize = 80;

/// Subject summary used when the issue has none
pub const UNDEFINED_SUMMARY: &str = "undefined";

/// Email errors
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Email build error: {0}")]
    Build(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EmailError {
    /// Whether submitting the same message again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            EmailError::Smtp(e) => !e.is_permanent(),
            EmailError::SendFailed(_) => true,
            _ => false,
        }
    }
}

impl From<EmailError> for NotifyError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::Config(e) => NotifyError::Config(e),
            other => NotifyError::Delivery(other.to_string()),
        }
    }
}

pub type EmailResult<T> = Result<T, EmailError>;

/// Email message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Message ID
    pub id: String,
    /// Sender address
    pub from: EmailAddress,
    /// Recipient addresses
    pub to: Vec<EmailAddress>,
    /// Subject line
    pub subject: String,
    /// Plain text body (clear or armored cipher text)
    pub text_body: String,
    /// Custom headers
    pub headers: Vec<(String, String)>,
}

/// Email address with optional name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    pub email: String,
    pub name: Option<String>,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Format as RFC 5322
    pub fn to_rfc5322(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

impl EmailMessage {
    /// Create a new email message
    pub fn new(
        from: EmailAddress,
        to: Vec<EmailAddress>,
        subject: impl Into<String>,
        text_body: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from,
            to,
            subject: subject.into(),
            text_body: text_body.into(),
            headers: Vec::new(),
        }
    }

    /// Add a custom header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add the Smit routing headers
    pub fn with_smit_headers(self, event: &EventRecord, encrypted: bool) -> Self {
        let message = self
            .header("X-Smit-Project", event.project.clone())
            .header("X-Smit-Issue", event.issue.clone());
        if encrypted {
            message.header("X-Smit-Encrypted", "yes")
        } else {
            message
        }
    }
}

/// Email sender trait
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send an email, returning the message id
    async fn send(&self, message: &EmailMessage) -> EmailResult<String>;
}

/// Console email sender (dry runs)
pub struct ConsoleEmailSender;

impl Default for ConsoleEmailSender {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleEmailSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmailSender for ConsoleEmailSender {
    async fn send(&self, message: &EmailMessage) -> EmailResult<String> {
        println!("=== EMAIL ===");
        println!("From: {}", message.from.to_rfc5322());
        println!(
            "To: {}",
            message
                .to
                .iter()
                .map(|a| a.to_rfc5322())
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!("Subject: {}", message.subject);
        for (name, value) in &message.headers {
            println!("{}: {}", name, value);
        }
        println!("---");
        println!("{}", message.text_body.replace(EOL, "\n"));
        println!("=============");

        Ok(message.id.clone())
    }
}

/// Escape a project name for use in a URL path.
///
/// Every byte outside ASCII alphanumerics and `._-` becomes `=` followed by
/// its two-digit lowercase hex code. `=` is escaped too, so the mapping is
/// injective.
pub fn escape_project_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("={:02x}", byte));
        }
    }
    escaped
}

/// Plain-text renderer for entry notifications
#[derive(Debug, Clone, Default)]
pub struct EmailRenderer {
    root_url: Option<String>,
}

impl EmailRenderer {
    pub fn new(root_url: Option<String>) -> Self {
        Self {
            root_url: root_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    /// `[<project>] <issue>: <summary>`
    pub fn render_subject(&self, event: &EventRecord) -> String {
        format!(
            "[{}] {}: {}",
            event.project,
            event.issue,
            event.summary().unwrap_or(UNDEFINED_SUMMARY)
        )
    }

    /// Link to the issue on the web server, if a root URL is configured
    pub fn issue_url(&self, event: &EventRecord) -> Option<String> {
        self.root_url.as_ref().map(|root| {
            format!(
                "{}/{}/issues/{}",
                root,
                escape_project_name(&event.project),
                event.issue
            )
        })
    }

    /// Recap of the issue properties, message, attached files and link
    pub fn render_body(&self, event: &EventRecord) -> String {
        let mut body = String::new();

        push_line(&mut body, &self.render_subject(event));

        let marker = if event.is_new {
            "New issue"
        } else {
            "Modified issue"
        };
        match event.author() {
            Some(author) => push_line(&mut body, &format!("{}, by {}", marker, author)),
            None => push_line(&mut body, marker),
        }

        push_rule(&mut body);
        for (name, property) in &event.properties {
            let prefix = if event.is_modified(name) { "** " } else { "   " };
            let label = event.label_of(name);
            // continuation lines of multi-line values line up under the value
            let indent = " ".repeat(prefix.len() + label.chars().count() + 2);
            let value = property
                .value
                .display()
                .lines()
                .collect::<Vec<_>>()
                .join(&format!("{}{}", EOL, indent));
            push_line(&mut body, &format!("{}{}: {}", prefix, label, value));
        }

        if let Some(message) = event.message() {
            push_rule(&mut body);
            push_line(&mut body, "Message:");
            push_line(&mut body, message);
        }

        if !event.files.is_empty() {
            push_rule(&mut body);
            push_line(&mut body, "Attached files:");
            for file in &event.files {
                push_line(&mut body, &format!("    {}", file));
            }
        }

        if let Some(url) = self.issue_url(event) {
            push_rule(&mut body);
            push_line(&mut body, &url);
        }

        body
    }
}

fn push_line(body: &mut String, line: &str) {
    body.push_str(line);
    body.push_str(EOL);
}

fn push_rule(body: &mut String) {
    push_line(body, &"-".repeat(RULE_WIDTH));
}
