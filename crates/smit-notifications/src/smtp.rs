//! SMTP delivery
//!
//! [`SmtpEmailSender`] submits messages to the configured relay with the
//! `lettre` async transport. Plain relays (the usual local MTA on port 25),
//! STARTTLS and implicit TLS are supported.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use smit_core::config::SmtpConfig;

use crate::email::{EmailAddress, EmailError, EmailMessage, EmailResult, EmailSender};

/// Sends messages through an SMTP relay
pub struct SmtpEmailSender {
    config: SmtpConfig,
}

impl SmtpEmailSender {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> EmailResult<AsyncSmtpTransport<Tokio1Executor>> {
        let host = self.config.host.as_str();
        let builder = if self.config.ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
        } else if self.config.enable_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };

        let mut builder = builder
            .port(self.config.port)
            .timeout(Some(Duration::from_secs(self.config.timeout_seconds)));

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(builder.build())
    }
}

fn mailbox(address: &EmailAddress) -> EmailResult<Mailbox> {
    Ok(Mailbox::new(address.name.clone(), address.email.parse()?))
}

/// Build the MIME message: UTF-8 plain text, one `To` per recipient
pub fn build_message(message: &EmailMessage) -> EmailResult<Message> {
    if message.to.is_empty() {
        return Err(EmailError::InvalidRecipient("no recipient".to_string()));
    }

    let mut builder = Message::builder()
        .from(mailbox(&message.from)?)
        .subject(message.subject.clone())
        .header(ContentType::TEXT_PLAIN);

    for to in &message.to {
        let to = mailbox(to).map_err(|e| EmailError::InvalidRecipient(format!("{}: {}", to.email, e)))?;
        builder = builder.to(to);
    }

    for (name, value) in &message.headers {
        let name = HeaderName::new_from_ascii(name.clone())
            .map_err(|e| EmailError::Build(format!("header {}: {}", name, e)))?;
        builder = builder.raw_header(HeaderValue::new(name, value.clone()));
    }

    builder
        .body(message.text_body.clone())
        .map_err(|e| EmailError::Build(e.to_string()))
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &EmailMessage) -> EmailResult<String> {
        let email = build_message(message)?;
        let mailer = self.transport()?;

        let response = mailer.send(email).await?;
        if !response.is_positive() {
            return Err(EmailError::SendFailed(format!(
                "relay answered {}",
                response.code()
            )));
        }

        tracing::info!(
            host = %self.config.host,
            recipients = message.to.len(),
            message_id = %message.id,
            "Notification email submitted"
        );
        Ok(message.id.clone())
    }
}
