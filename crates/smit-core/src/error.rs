//! Core error types for the notification trigger
//!
//! Each library concern has its own error enum; everything converges on
//! [`NotifyError`] at the binary boundary, which also decides the exit code.

use thiserror::Error;

use crate::config::ConfigError;

/// Core error type for all trigger operations
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Directory error: {path}: {message}")]
    Directory { path: String, message: String },

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Missing public key for: {}", addresses.join(", "))]
    MissingKeys { addresses: Vec<String> },

    #[error("Delivery error: {0}")]
    Delivery(String),
}

impl NotifyError {
    pub fn directory(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Directory {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// Unreadable or malformed input exits with 1, configuration problems
    /// with 2 and everything that happens while preparing or delivering the
    /// mail with 3.
    pub fn exit_code(&self) -> i32 {
        match self {
            NotifyError::InvalidPayload(_) | NotifyError::Io(_) => 1,
            NotifyError::Config(_) | NotifyError::Directory { .. } => 2,
            NotifyError::Encryption(_)
            | NotifyError::MissingKeys { .. }
            | NotifyError::Delivery(_) => 3,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            NotifyError::InvalidPayload(_) => "invalid_payload",
            NotifyError::Io(_) => "io_error",
            NotifyError::Config(_) => "configuration_error",
            NotifyError::Directory { .. } => "directory_error",
            NotifyError::Encryption(_) => "encryption_error",
            NotifyError::MissingKeys { .. } => "missing_keys",
            NotifyError::Delivery(_) => "delivery_error",
        }
    }
}

/// Standard Result type for trigger operations
pub type NotifyResult<T> = Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_json_exits_with_one() {
        let err: NotifyError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.error_code(), "invalid_payload");
    }

    #[test]
    fn test_missing_keys_message() {
        let err = NotifyError::MissingKeys {
            addresses: vec!["a@example.com".into(), "b@example.com".into()],
        };
        assert_eq!(
            err.to_string(),
            "Missing public key for: a@example.com, b@example.com"
        );
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: NotifyError = ConfigError::MissingEnvVar("SMTP_HOST".into()).into();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("SMTP_HOST"));
    }
}
