//! Notification Dispatcher
//!
//! Orchestrates one invocation: policy check, recipient resolution,
//! rendering, encryption and submission.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use smit_core::{NotifyError, NotifyResult};

use crate::directory::RecipientDirectory;
use crate::email::{EmailAddress, EmailMessage, EmailRenderer, EmailResult, EmailSender};
use crate::encryption::{EncryptionOutcome, Encryptor};
use crate::event::EventRecord;
use crate::policy::{EncryptionMode, SelectionPolicy};
use crate::recipient::{KeyRef, RecipientSet};

/// Why nothing was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No trigger property was modified
    NotTriggered,
    /// Recipient resolution produced an empty set
    NoRecipients,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotTriggered => write!(f, "no trigger property modified"),
            SkipReason::NoRecipients => write!(f, "no recipient"),
        }
    }
}

/// Result of a dispatch
#[derive(Debug)]
pub enum DispatchOutcome {
    Sent {
        message_id: String,
        recipients: Vec<String>,
        encryption: EncryptionOutcome,
    },
    Skipped(SkipReason),
    Failed(NotifyError),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DispatchOutcome::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DispatchOutcome::Failed(_))
    }
}

/// Entry notification dispatcher
pub struct NotificationDispatcher<E: EmailSender + ?Sized, C: Encryptor + ?Sized> {
    email_sender: Arc<E>,
    encryptor: Arc<C>,
    renderer: EmailRenderer,
    from_address: EmailAddress,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<E: EmailSender + ?Sized, C: Encryptor + ?Sized> NotificationDispatcher<E, C> {
    pub fn new(
        email_sender: Arc<E>,
        encryptor: Arc<C>,
        renderer: EmailRenderer,
        from_address: EmailAddress,
    ) -> Self {
        Self {
            email_sender,
            encryptor,
            renderer,
            from_address,
            max_attempts: 1,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Retry submission up to `max_attempts` times, waiting `attempt * delay`
    /// between attempts
    pub fn with_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn should_notify(&self, event: &EventRecord, policy: &SelectionPolicy) -> bool {
        policy.should_notify(event)
    }

    pub fn resolve_recipients(
        &self,
        event: &EventRecord,
        policy: &SelectionPolicy,
        directory: &RecipientDirectory,
    ) -> RecipientSet {
        policy.resolve_recipients(event, directory)
    }

    pub fn render_subject(&self, event: &EventRecord) -> String {
        self.renderer.render_subject(event)
    }

    pub fn render_body(&self, event: &EventRecord) -> String {
        self.renderer.render_body(event)
    }

    /// Key of a recipient: its own, else the directory's, else the local
    /// keyring's when the policy allows the lookup.
    async fn key_for(
        &self,
        email: &str,
        own: Option<&KeyRef>,
        policy: &SelectionPolicy,
        directory: &RecipientDirectory,
    ) -> Option<KeyRef> {
        if let Some(key) = own {
            return Some(key.clone());
        }
        if let Some(id) = directory.key_of(email) {
            return Some(KeyRef::Id(id.to_string()));
        }
        if !policy.keyring_lookup {
            return None;
        }
        match self.encryptor.find_key(email).await {
            Ok(found) => found.map(KeyRef::Id),
            Err(e) => {
                tracing::warn!(email, error = %e, "Keyring lookup failed");
                None
            }
        }
    }

    /// Encrypt `body` for the recipients as the policy's mode requires.
    ///
    /// Returns the text to send and whether it is cipher text. An error means
    /// nothing may be sent. A recipient whose key the encryptor rejects
    /// counts as a recipient without key.
    pub async fn maybe_encrypt(
        &self,
        body: &str,
        recipients: &RecipientSet,
        policy: &SelectionPolicy,
        directory: &RecipientDirectory,
    ) -> NotifyResult<(String, EncryptionOutcome)> {
        let mode = policy.encryption;
        let clear_text = || (body.to_string(), EncryptionOutcome::ClearText);

        let mut owners: Vec<(String, KeyRef)> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        for recipient in recipients.iter() {
            match self
                .key_for(&recipient.email, recipient.key.as_ref(), policy, directory)
                .await
            {
                Some(key) => owners.push((recipient.email.clone(), key)),
                None => missing.push(recipient.email.clone()),
            }
        }

        if apply_mode(mode, &missing, owners.is_empty())? == KeyCoverage::ClearText {
            return Ok(clear_text());
        }

        let mut keys: Vec<KeyRef> = Vec::new();
        for (_, key) in &owners {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }

        let cipher_text = match self.encryptor.encrypt(body, &keys).await {
            Ok(cipher_text) => cipher_text,
            Err(e) if mode == EncryptionMode::Lenient => {
                tracing::error!(error = %e, "Encryption failed, sending in clear text");
                return Ok(clear_text());
            }
            Err(e) => return Err(NotifyError::Encryption(e.to_string())),
        };

        if !cipher_text.rejected.is_empty() {
            missing.extend(
                owners
                    .iter()
                    .filter(|(_, key)| cipher_text.rejected.contains(key))
                    .map(|(email, _)| email.clone()),
            );
            tracing::debug!(rejected = cipher_text.rejected.len(), "Keys not usable");
            if apply_mode(mode, &missing, cipher_text.key_count == 0)? == KeyCoverage::ClearText {
                return Ok(clear_text());
            }
        }

        tracing::debug!(keys = cipher_text.key_count, "Message encrypted");
        Ok((
            cipher_text.armored,
            EncryptionOutcome::Encrypted {
                key_count: cipher_text.key_count,
            },
        ))
    }

    async fn send_with_retry(&self, message: &EmailMessage) -> EmailResult<String> {
        let mut attempt = 1;
        loop {
            match self.email_sender.send(message).await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(attempt, error = %e, "Mail submission failed, retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the whole pipeline for one event
    pub async fn dispatch(
        &self,
        event: &EventRecord,
        policy: &SelectionPolicy,
        directory: &RecipientDirectory,
    ) -> DispatchOutcome {
        if !self.should_notify(event, policy) {
            tracing::info!(
                project = %event.project,
                issue = %event.issue,
                triggers = ?policy.trigger_properties,
                "No trigger property modified, mail not sent"
            );
            return DispatchOutcome::Skipped(SkipReason::NotTriggered);
        }

        let recipients = self.resolve_recipients(event, policy, directory);
        if recipients.is_empty() {
            tracing::info!(project = %event.project, issue = %event.issue, "No recipient, mail not sent");
            return DispatchOutcome::Skipped(SkipReason::NoRecipients);
        }

        let subject = self.render_subject(event);
        let body = self.render_body(event);

        let (text, encryption) = match self
            .maybe_encrypt(&body, &recipients, policy, directory)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(error = %e, mode = ?policy.encryption, "Delivery preparation failed, mail not sent");
                return DispatchOutcome::Failed(e);
            }
        };

        let addresses = recipients.addresses();
        let message = EmailMessage::new(
            self.from_address.clone(),
            addresses.iter().map(EmailAddress::new).collect(),
            subject,
            text,
        )
        .with_smit_headers(event, encryption.is_encrypted());

        match self.send_with_retry(&message).await {
            Ok(message_id) => {
                tracing::info!(
                    project = %event.project,
                    issue = %event.issue,
                    recipients = ?addresses,
                    encrypted = encryption.is_encrypted(),
                    "Notification sent"
                );
                DispatchOutcome::Sent {
                    message_id,
                    recipients: addresses,
                    encryption,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Mail submission failed");
                DispatchOutcome::Failed(e.into())
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum KeyCoverage {
    Encrypt,
    ClearText,
}

/// What the mode allows given the recipients still lacking a usable key.
/// An error means nothing may be sent.
fn apply_mode(mode: EncryptionMode, missing: &[String], no_key: bool) -> NotifyResult<KeyCoverage> {
    let missing_keys = || NotifyError::MissingKeys {
        addresses: missing.to_vec(),
    };
    match mode {
        EncryptionMode::Strict if !missing.is_empty() => Err(missing_keys()),
        EncryptionMode::Forced if no_key => Err(missing_keys()),
        EncryptionMode::Lenient if !missing.is_empty() || no_key => {
            tracing::warn!(?missing, "Recipients without usable public key, sending in clear text");
            Ok(KeyCoverage::ClearText)
        }
        EncryptionMode::Forced if !missing.is_empty() => {
            tracing::warn!(
                ?missing,
                "Recipients without usable public key will not be able to read the message"
            );
            Ok(KeyCoverage::Encrypt)
        }
        _ => Ok(KeyCoverage::Encrypt),
    }
}
