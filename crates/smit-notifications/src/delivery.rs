//! Configured delivery
//!
//! [`ConfiguredEmailSender`] picks the console or the SMTP relay from the
//! email configuration when the first message is submitted. Events that
//! produce no mail therefore never touch the delivery settings.

use async_trait::async_trait;
use smit_core::config::{EmailConfig, EmailDeliveryMethod};

use crate::email::{ConsoleEmailSender, EmailAddress, EmailMessage, EmailResult, EmailSender};
use crate::smtp::SmtpEmailSender;

pub struct ConfiguredEmailSender {
    config: EmailConfig,
}

impl ConfiguredEmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Sender address from the configuration
    pub fn from_address(&self) -> EmailAddress {
        let address = EmailAddress::new(self.config.from_address.clone());
        match &self.config.from_name {
            Some(name) => address.with_name(name.clone()),
            None => address,
        }
    }
}

#[async_trait]
impl EmailSender for ConfiguredEmailSender {
    async fn send(&self, message: &EmailMessage) -> EmailResult<String> {
        self.config.validate()?;

        match (self.config.delivery_method, &self.config.smtp) {
            (EmailDeliveryMethod::Smtp, Some(smtp)) => {
                SmtpEmailSender::new(smtp.clone()).send(message).await
            }
            _ => ConsoleEmailSender::new().send(message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::EmailError;
    use smit_core::ConfigError;

    fn email_config(delivery_method: EmailDeliveryMethod) -> EmailConfig {
        EmailConfig {
            delivery_method,
            smtp: None,
            from_address: "tracker@example.com".to_string(),
            from_name: Some("Smit".to_string()),
            max_attempts: 1,
        }
    }

    fn message() -> EmailMessage {
        EmailMessage::new(
            EmailAddress::new("tracker@example.com"),
            vec![EmailAddress::new("bob@example.com")],
            "[p] 1: crash",
            "body",
        )
    }

    #[tokio::test]
    async fn test_missing_relay_is_reported_at_submission() {
        let sender = ConfiguredEmailSender::new(email_config(EmailDeliveryMethod::Smtp));

        let err = sender.send(&message()).await.unwrap_err();
        assert!(matches!(
            err,
            EmailError::Config(ConfigError::MissingEnvVar(ref key)) if key == "SMTP_HOST"
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_console_delivery_needs_no_relay() {
        let sender = ConfiguredEmailSender::new(email_config(EmailDeliveryMethod::Console));
        let message = message();

        assert_eq!(sender.send(&message).await.unwrap(), message.id);
    }

    #[test]
    fn test_from_address() {
        let sender = ConfiguredEmailSender::new(email_config(EmailDeliveryMethod::Console));
        assert_eq!(sender.from_address().to_rfc5322(), "Smit <tracker@example.com>");
    }
}
