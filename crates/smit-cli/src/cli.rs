//! CLI argument definitions using clap.

use clap::{Parser, ValueEnum};
use smit_notifications::{EncryptionMode, SelectionPolicy};
use std::path::PathBuf;

/// Smit notification trigger
#[derive(Parser, Debug)]
#[command(
    name = "smit-notify",
    author,
    version,
    about = "Mail notifications for Smit issue entries",
    long_about = "Reads the JSON event written by the Smit server on stdin, selects the \n\
                  recipients, renders a plain-text recap of the issue, encrypts it with \n\
                  gpg when keys are available and submits it to the SMTP relay."
)]
pub struct Cli {
    /// Notify only when one of these properties was modified
    #[arg(long, value_delimiter = ',', value_name = "PROPERTY")]
    pub trigger: Vec<String>,

    /// Property whose value names the users to notify
    #[arg(long, value_name = "PROPERTY")]
    pub designee: Option<String>,

    /// Notify the project administrators
    #[arg(long)]
    pub admins: bool,

    /// Literal recipient addresses
    #[arg(long, value_delimiter = ',', value_name = "ADDRESS")]
    pub to: Vec<String>,

    /// Notify the recipients listed in the event itself
    #[arg(long)]
    pub event_recipients: bool,

    /// Behaviour when keys are missing or encryption fails
    #[arg(long, value_enum, default_value = "lenient", env = "SMIT_ENCRYPTION")]
    pub encryption: EncryptionArg,

    /// Never send clear text (same as --encryption forced)
    #[arg(long)]
    pub force_ciphering: bool,

    /// Look up missing keys in the local gpg keyring
    #[arg(long)]
    pub keyring_lookup: bool,

    /// Address and key directory (TOML or JSON)
    #[arg(long, env = "SMIT_DIRECTORY")]
    pub directory: Option<PathBuf>,

    /// Use a built-in event instead of reading stdin
    #[arg(long)]
    pub test: bool,

    /// Print the message instead of sending it
    #[arg(long)]
    pub dry_run: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, env = "SMIT_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "compact", env = "SMIT_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Selection policy described by the flags.
    ///
    /// Without any recipient flag the recipients listed in the event are used.
    pub fn policy(&self) -> SelectionPolicy {
        let mode = if self.force_ciphering {
            EncryptionMode::Forced
        } else {
            self.encryption.into()
        };

        let mut policy = SelectionPolicy::new()
            .trigger_on(self.trigger.iter().map(|t| t.trim()).filter(|t| !t.is_empty()))
            .to(self.to.iter().map(|a| a.trim()).filter(|a| !a.is_empty()))
            .encryption(mode)
            .keyring_lookup(self.keyring_lookup);
        if self.admins {
            policy = policy.with_admins();
        }
        if let Some(property) = &self.designee {
            policy = policy.designee(property.as_str());
        }
        if self.event_recipients || !policy.has_sources() {
            policy = policy.with_event_recipients();
        }
        policy
    }
}

/// Encryption mode
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncryptionArg {
    /// Encrypt when every recipient has a key, else send clear text
    #[default]
    Lenient,
    /// Refuse to send unless every recipient has a key
    Strict,
    /// Encrypt with the available keys, never send clear text
    Forced,
}

impl From<EncryptionArg> for EncryptionMode {
    fn from(arg: EncryptionArg) -> Self {
        match arg {
            EncryptionArg::Lenient => EncryptionMode::Lenient,
            EncryptionArg::Strict => EncryptionMode::Strict,
            EncryptionArg::Forced => EncryptionMode::Forced,
        }
    }
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("smit-notify").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_policy_uses_event_recipients() {
        let policy = parse(&[]).policy();
        assert!(policy.event_recipients);
        assert!(!policy.admins);
        assert!(policy.trigger_properties.is_empty());
        assert_eq!(policy.encryption, EncryptionMode::Lenient);
    }

    #[test]
    fn test_policy_from_flags() {
        let policy = parse(&[
            "--trigger",
            "status,assignee",
            "--designee",
            "assignee",
            "--admins",
            "--to",
            "ops@example.com, qa@example.com",
            "--encryption",
            "strict",
            "--keyring-lookup",
        ])
        .policy();

        assert_eq!(policy.trigger_properties, vec!["status", "assignee"]);
        assert_eq!(policy.designee_property.as_deref(), Some("assignee"));
        assert!(policy.admins);
        assert_eq!(policy.explicit, vec!["ops@example.com", "qa@example.com"]);
        assert!(!policy.event_recipients);
        assert_eq!(policy.encryption, EncryptionMode::Strict);
        assert!(policy.keyring_lookup);
    }

    #[test]
    fn test_force_ciphering_overrides_mode() {
        let policy = parse(&["--admins", "--force-ciphering"]).policy();
        assert_eq!(policy.encryption, EncryptionMode::Forced);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["smit-notify", "-q", "-v"]).is_err());
    }

    #[test]
    fn test_unknown_encryption_mode_is_rejected() {
        assert!(Cli::try_parse_from(["smit-notify", "--encryption", "maybe"]).is_err());
    }
}
