//! Recipient Directory
//!
//! Static mapping from usernames (or property values naming users) to email
//! addresses, and from email addresses to public-key identifiers. Loaded once
//! from a TOML or JSON file:
//!
//! ```toml
//! [addresses]
//! fred = "fred@example.com"
//!
//! [keys]
//! "fred@example.com" = "BD542930"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use smit_core::NotifyError;
use thiserror::Error;

/// Directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Unsupported directory format: {0} (expected .toml or .json)")]
    UnsupportedFormat(PathBuf),
}

impl From<DirectoryError> for NotifyError {
    fn from(err: DirectoryError) -> Self {
        let path = match &err {
            DirectoryError::Read { path, .. }
            | DirectoryError::Parse { path, .. }
            | DirectoryError::UnsupportedFormat(path) => path.display().to_string(),
        };
        NotifyError::directory(path, err.to_string())
    }
}

/// Directory file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryFormat {
    Toml,
    Json,
}

impl DirectoryFormat {
    /// Infer the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Address and key directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecipientDirectory {
    /// username or property value -> email address
    #[serde(default)]
    addresses: HashMap<String, String>,
    /// email address -> public-key identifier
    #[serde(default)]
    keys: HashMap<String, String>,
}

impl RecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, user: impl Into<String>, email: impl Into<String>) -> Self {
        self.addresses.insert(user.into(), email.into());
        self
    }

    pub fn with_key(mut self, email: impl Into<String>, key_id: impl Into<String>) -> Self {
        self.keys.insert(email.into(), key_id.into());
        self
    }

    /// Load a directory file, choosing the parser from its extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref();
        let format = DirectoryFormat::from_path(path)
            .ok_or_else(|| DirectoryError::UnsupportedFormat(path.to_path_buf()))?;
        let content = std::fs::read_to_string(path).map_err(|source| DirectoryError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let directory = Self::parse(&content, format).map_err(|message| DirectoryError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        tracing::debug!(
            path = %path.display(),
            addresses = directory.addresses.len(),
            keys = directory.keys.len(),
            "Loaded recipient directory"
        );
        Ok(directory)
    }

    /// Parse directory content in the given format
    pub fn parse(content: &str, format: DirectoryFormat) -> Result<Self, String> {
        match format {
            DirectoryFormat::Toml => {
                toml::from_str(content).map_err(|e| format!("TOML parse error: {e}"))
            }
            DirectoryFormat::Json => {
                serde_json::from_str(content).map_err(|e| format!("JSON parse error: {e}"))
            }
        }
    }

    /// Email address of a user, if known
    pub fn address_of(&self, user: &str) -> Option<&str> {
        self.addresses.get(user).map(String::as_str)
    }

    /// Public-key identifier of an address, if known
    pub fn key_of(&self, email: &str) -> Option<&str> {
        self.keys
            .get(email)
            .or_else(|| {
                self.keys
                    .iter()
                    .find(|(address, _)| address.eq_ignore_ascii_case(email))
                    .map(|(_, key)| key)
            })
            .map(String::as_str)
            .filter(|key| !key.trim().is_empty())
    }
}
