//! Configuration types and loading
//!
//! Everything the trigger needs besides the event itself comes from the
//! environment (a `.env` file is honoured by the binary).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Email/SMTP configuration
    pub email: EmailConfig,

    /// Web front-end configuration (deep links)
    pub web: WebConfig,

    /// Encryption tool configuration
    pub gpg: GpgConfig,

    /// Address/key directory file
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    pub delivery_method: EmailDeliveryMethod,
    pub smtp: Option<SmtpConfig>,
    pub from_address: String,
    pub from_name: Option<String>,
    /// Submission attempts before giving up (1 = no retry)
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmailDeliveryMethod {
    #[default]
    Smtp,
    /// Print messages on stdout instead of sending them
    Console,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub enable_starttls: bool,
    pub ssl: bool,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebConfig {
    /// Root URL of the Smit web server, e.g. `https://smit.example.com`
    pub root_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpgConfig {
    /// Path or name of the gpg executable
    pub program: String,
    /// Keyring used for key-id exports and identity lookups
    pub home: Option<PathBuf>,
    /// Upper bound for a single gpg invocation
    pub timeout_seconds: u64,
}

pub const DEFAULT_SMTP_PORT: u16 = 25;
pub const DEFAULT_FROM_ADDRESS: &str = "smit@example.com";
pub const DEFAULT_GPG_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_SMTP_TIMEOUT_SECONDS: u64 = 60;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            email: EmailConfig {
                delivery_method: EmailDeliveryMethod::Smtp,
                smtp: None,
                from_address: DEFAULT_FROM_ADDRESS.to_string(),
                from_name: None,
                max_attempts: 1,
            },
            web: WebConfig::default(),
            gpg: GpgConfig {
                program: "gpg".to_string(),
                home: None,
                timeout_seconds: DEFAULT_GPG_TIMEOUT_SECONDS,
            },
            directory: None,
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// `from_env` is this function over the process environment; tests feed
    /// it a map instead so they never touch global state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let parse_bool = |v: String| v == "true" || v == "1" || v == "yes";

        // Email
        if let Some(host) = lookup("SMTP_HOST").filter(|h| !h.trim().is_empty()) {
            let ssl = lookup("SMTP_SSL").map(parse_bool).unwrap_or(false);
            config.email.smtp = Some(SmtpConfig {
                host,
                port: parse_number(&lookup, "SMTP_PORT")?
                    .unwrap_or(if ssl { 465 } else { DEFAULT_SMTP_PORT }),
                username: lookup("SMTP_USERNAME"),
                password: lookup("SMTP_PASSWORD"),
                enable_starttls: lookup("SMTP_STARTTLS").map(parse_bool).unwrap_or(false),
                ssl,
                timeout_seconds: parse_number(&lookup, "SMTP_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_SMTP_TIMEOUT_SECONDS),
            });
        }
        if let Some(from) = lookup("SMTP_FROM") {
            config.email.from_address = from;
        }
        config.email.from_name = lookup("SMTP_FROM_NAME");
        if let Some(attempts) = parse_number::<u32, _>(&lookup, "SMTP_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "SMTP_MAX_ATTEMPTS".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            config.email.max_attempts = attempts;
        }

        // Web
        config.web.root_url = lookup("SMIT_ROOT_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        // Gpg
        if let Some(program) = lookup("SMIT_GPG_PROGRAM") {
            config.gpg.program = program;
        }
        config.gpg.home = lookup("GNUPGHOME").map(PathBuf::from);
        if let Some(timeout) = parse_number(&lookup, "SMIT_GPG_TIMEOUT_SECS")? {
            config.gpg.timeout_seconds = timeout;
        }

        config.directory = lookup("SMIT_DIRECTORY").map(PathBuf::from);

        Ok(config)
    }

    /// Check that the configuration can deliver mail
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.email.validate()
    }
}

impl EmailConfig {
    /// Check that mail can be delivered with these settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery_method == EmailDeliveryMethod::Smtp && self.smtp.is_none() {
            return Err(ConfigError::MissingEnvVar("SMTP_HOST".to_string()));
        }
        if self.from_address.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "SMTP_FROM".to_string(),
                message: "sender address is empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_number<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}
