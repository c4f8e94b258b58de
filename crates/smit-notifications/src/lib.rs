//! # smit-notifications
//!
//! Mail notifications for Smit issue entries.
//!
//! ## Features
//!
//! - Event payload parsing (the JSON record written by the Smit server)
//! - Recipient selection from admins, designees, literal addresses and
//!   payload recipients
//! - Plain-text rendering of the issue recap
//! - OpenPGP encryption through an external `gpg`
//! - SMTP submission with bounded retry

pub mod delivery;
pub mod directory;
pub mod email;
pub mod encryption;
pub mod event;
pub mod policy;
pub mod recipient;
pub mod service;
pub mod smtp;

pub use delivery::ConfiguredEmailSender;
pub use directory::{DirectoryError, DirectoryFormat, RecipientDirectory};
pub use email::{ConsoleEmailSender, EmailAddress, EmailMessage, EmailRenderer, EmailSender};
pub use encryption::{CipherText, EncryptionError, EncryptionOutcome, Encryptor, GpgEncryptor};
pub use event::{EventRecord, Property, PropertyValue};
pub use policy::{EncryptionMode, SelectionPolicy};
pub use recipient::{KeyRef, Recipient, RecipientSet};
pub use service::{DispatchOutcome, NotificationDispatcher, SkipReason};
pub use smtp::SmtpEmailSender;
