//! Message Encryption
//!
//! The encryption tool is an external collaborator: given clear text and a
//! set of public keys it returns armored cipher text, or fails. [`GpgEncryptor`]
//! drives `gpg` in an ephemeral home directory so the caller's keyring is
//! never modified.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use smit_core::config::GpgConfig;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::recipient::KeyRef;

/// Encryption errors
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },
    #[error("{program} exited with status {code}: {stderr}")]
    ToolFailed {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("No public key could be imported")]
    NoUsableKey,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of the encryption step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionOutcome {
    ClearText,
    Encrypted { key_count: usize },
}

impl EncryptionOutcome {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, EncryptionOutcome::Encrypted { .. })
    }
}

/// Armored cipher text produced by an [`Encryptor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherText {
    pub armored: String,
    /// Keys the text was encrypted for
    pub key_count: usize,
    /// Requested keys that could not be exported or imported; their owners
    /// cannot read the text
    pub rejected: Vec<KeyRef>,
}

/// Encryption collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Encryptor: Send + Sync {
    /// Look up a key for `email` in the local keyring
    async fn find_key(&self, email: &str) -> Result<Option<String>, EncryptionError>;

    /// Encrypt `clear_text` for the usable keys among `keys`
    async fn encrypt(&self, clear_text: &str, keys: &[KeyRef])
        -> Result<CipherText, EncryptionError>;
}

struct ToolOutput {
    code: i32,
    stdout: Vec<u8>,
    stderr: String,
}

/// `gpg` command-line driver
pub struct GpgEncryptor {
    program: String,
    home: Option<PathBuf>,
    timeout: Duration,
}

impl GpgEncryptor {
    pub fn new(config: &GpgConfig) -> Self {
        Self {
            program: config.program.clone(),
            home: config.home.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Run gpg with `args`, feeding `stdin`, bounded by the configured timeout.
    async fn run(
        &self,
        home: Option<&Path>,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<ToolOutput, EncryptionError> {
        let mut cmd = Command::new(&self.program);
        if let Some(home) = home {
            cmd.arg("--homedir").arg(home);
        }
        cmd.arg("--batch")
            .arg("--no-tty")
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %self.program, ?args, "Running encryption tool");

        let mut child = cmd.spawn().map_err(|source| EncryptionError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Feed stdin from a task so a chatty child cannot block on a full
        // stdout pipe while we are still writing.
        let writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_vec();
                Some(tokio::spawn(async move {
                    pipe.write_all(&input).await?;
                    pipe.shutdown().await
                }))
            }
            _ => None,
        };

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| EncryptionError::Timeout {
                program: self.program.clone(),
                seconds: self.timeout.as_secs(),
            })??;

        let output = ToolOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        // A failed exit already tells the caller; a short write with a
        // successful exit means gpg worked on truncated input.
        if let Some(writer) = writer {
            let written = writer
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
                .and_then(|result| result);
            if let Err(e) = written {
                if output.code == 0 {
                    return Err(EncryptionError::Io(e));
                }
                tracing::debug!(error = %e, "Writing to encryption tool failed");
            }
        }

        Ok(output)
    }

    /// Armored key material for a key reference
    async fn key_material(&self, key: &KeyRef) -> Result<Option<Vec<u8>>, EncryptionError> {
        match key {
            KeyRef::Armored(block) => Ok(Some(block.as_bytes().to_vec())),
            KeyRef::Id(id) => {
                let output = self
                    .run(self.home.as_deref(), &["--armor", "--export", id.as_str()], None)
                    .await?;
                if output.code != 0 || output.stdout.is_empty() {
                    tracing::warn!(key_id = %id, stderr = %output.stderr.trim(), "Cannot export key");
                    Ok(None)
                } else {
                    Ok(Some(output.stdout))
                }
            }
        }
    }
}

#[async_trait]
impl Encryptor for GpgEncryptor {
    async fn find_key(&self, email: &str) -> Result<Option<String>, EncryptionError> {
        let output = self
            .run(
                self.home.as_deref(),
                &["--with-colons", "--list-keys", email],
                None,
            )
            .await?;
        if output.code != 0 {
            return Ok(None);
        }
        Ok(parse_key_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn encrypt(
        &self,
        clear_text: &str,
        keys: &[KeyRef],
    ) -> Result<CipherText, EncryptionError> {
        let keyring = tempfile::Builder::new().prefix("smit-gnupg").tempdir()?;

        let mut ids = BTreeSet::new();
        let mut rejected = Vec::new();
        for key in keys {
            let Some(material) = self.key_material(key).await? else {
                rejected.push(key.clone());
                continue;
            };
            let output = self
                .run(Some(keyring.path()), &["--import"], Some(&material))
                .await?;
            let imported = parse_imported_key_ids(&output.stderr);
            if output.code != 0 || imported.is_empty() {
                tracing::warn!(stderr = %output.stderr.trim(), "Key import failed");
                rejected.push(key.clone());
                continue;
            }
            ids.extend(imported);
        }

        if ids.is_empty() {
            return Err(EncryptionError::NoUsableKey);
        }
        tracing::debug!(key_ids = ?ids, "Imported public keys");

        let mut args = vec!["--encrypt", "--armor", "--trust-model", "always"];
        for id in &ids {
            args.push("--recipient");
            args.push(id.as_str());
        }

        let output = self
            .run(Some(keyring.path()), &args, Some(clear_text.as_bytes()))
            .await?;
        if output.code != 0 {
            return Err(EncryptionError::ToolFailed {
                program: self.program.clone(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(CipherText {
            armored: String::from_utf8_lossy(&output.stdout).into_owned(),
            key_count: ids.len(),
            rejected,
        })
    }
}

/// Key ids reported by `gpg --import` on stderr, from lines such as
/// `gpg: key BD542930: public key "Alice <alice@example.com>" imported`.
pub fn parse_imported_key_ids(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, ':');
            if fields.next()?.trim() != "gpg" {
                return None;
            }
            let mut words = fields.next()?.split_whitespace();
            match (words.next(), words.next()) {
                (Some("key"), Some(id)) => Some(id.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// First usable key in `--with-colons --list-keys` output: the fingerprint
/// when listed, else the key id. Revoked, expired and disabled keys are
/// skipped.
pub fn parse_key_listing(listing: &str) -> Option<String> {
    let mut candidate: Option<String> = None;
    for line in listing.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first().copied() {
            Some("pub") => {
                if candidate.is_some() {
                    return candidate;
                }
                let validity = fields.get(1).copied().unwrap_or("");
                let capabilities = fields.get(11).copied().unwrap_or("");
                if matches!(validity, "r" | "e" | "d") || capabilities.contains('D') {
                    continue;
                }
                candidate = fields
                    .get(4)
                    .filter(|id| !id.is_empty())
                    .map(|id| id.to_string());
            }
            Some("fpr") if candidate.is_some() => {
                if let Some(fpr) = fields.get(9).filter(|f| !f.is_empty()) {
                    return Some(fpr.to_string());
                }
            }
            Some("sub") if candidate.is_some() => return candidate,
            _ => {}
        }
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_imported_key_ids() {
        let stderr = "gpg: keybox '/tmp/x/pubring.kbx' created\n\
                      gpg: key BD542930: public key \"Alice <alice@example.com>\" imported\n\
                      gpg: Total number processed: 1\n\
                      gpg:               imported: 1\n";
        assert_eq!(parse_imported_key_ids(stderr), vec!["BD542930"]);
        assert!(parse_imported_key_ids("gpg: no valid OpenPGP data found.\n").is_empty());
    }

    #[test]
    fn test_parse_key_listing_prefers_fingerprint() {
        let listing = "tru::1:1700000000:0:3:1:5\n\
                       pub:u:4096:1:0123456789ABCDEF:1700000000:::u:::scESC::::::23::0:\n\
                       fpr:::::::::AAAABBBBCCCCDDDDEEEEFFFF0123456789ABCDEF:\n\
                       uid:u::::1700000000::HASH::Alice <alice@example.com>::::::::::0:\n";
        assert_eq!(
            parse_key_listing(listing),
            Some("AAAABBBBCCCCDDDDEEEEFFFF0123456789ABCDEF".to_string())
        );
    }

    #[test]
    fn test_parse_key_listing_skips_revoked() {
        let listing = "pub:r:4096:1:1111111111111111:1700000000:::u:::sc::::::23::0:\n\
                       fpr:::::::::REVOKEDREVOKEDREVOKED1111111111111111:\n\
                       pub:f:4096:1:2222222222222222:1700000000:::u:::scESC::::::23::0:\n\
                       fpr:::::::::GOODGOODGOODGOODGOOD2222222222222222:\n";
        assert_eq!(
            parse_key_listing(listing),
            Some("GOODGOODGOODGOODGOOD2222222222222222".to_string())
        );
        assert_eq!(parse_key_listing(""), None);
    }

    #[test]
    fn test_parse_key_listing_without_fingerprint() {
        let listing = "pub:u:4096:1:0123456789ABCDEF:1700000000:::u:::scESC::::::23::0:\n";
        assert_eq!(
            parse_key_listing(listing),
            Some("0123456789ABCDEF".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_reported() {
        let encryptor = GpgEncryptor::new(&GpgConfig {
            program: "/nonexistent/gpg".to_string(),
            home: None,
            timeout_seconds: 5,
        });
        let err = encryptor
            .encrypt("hello", &[KeyRef::Armored("-----BEGIN PGP PUBLIC KEY BLOCK-----".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, EncryptionError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_tool() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow-gpg");
        std::fs::write(&path, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let encryptor = GpgEncryptor {
            program: path.display().to_string(),
            home: None,
            timeout: Duration::from_millis(200),
        };
        let err = encryptor.find_key("alice@example.com").await.unwrap_err();
        assert!(matches!(err, EncryptionError::Timeout { .. }));
    }

    #[cfg(unix)]
    fn fake_gpg(dir: &Path, script: &str) -> GpgEncryptor {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-gpg");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        GpgEncryptor {
            program: path.display().to_string(),
            home: None,
            timeout: Duration::from_secs(10),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unexportable_key_is_not_used() {
        let dir = tempfile::tempdir().unwrap();
        // exports nothing, as gpg does for an unknown key id
        let encryptor = fake_gpg(dir.path(), "#!/bin/sh\nexit 0\n");

        let err = encryptor
            .encrypt("hello", &[KeyRef::Id("DEADBEEFDEADBEEF".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, EncryptionError::NoUsableKey));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unread_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let encryptor = fake_gpg(dir.path(), "#!/bin/sh\nexit 0\n");
        let block = "A".repeat(4 * 1024 * 1024);

        let err = encryptor
            .encrypt("hello", &[KeyRef::Armored(block)])
            .await
            .unwrap_err();
        assert!(matches!(err, EncryptionError::Io(_)));
    }

    fn gpg(home: &Path, args: &[&str]) -> std::process::Output {
        std::process::Command::new("gpg")
            .arg("--homedir")
            .arg(home)
            .args(["--batch", "--no-tty", "--pinentry-mode", "loopback", "--passphrase", ""])
            .args(args)
            .output()
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a gpg binary"]
    async fn test_encrypt_then_decrypt_recovers_body() {
        let home = tempfile::tempdir().unwrap();
        let generated = gpg(
            home.path(),
            &["--quick-gen-key", "Alice <alice@example.com>", "default", "default", "never"],
        );
        assert!(generated.status.success());
        let exported = gpg(home.path(), &["--armor", "--export", "alice@example.com"]);
        let armored = String::from_utf8(exported.stdout).unwrap();

        let encryptor = GpgEncryptor::new(&GpgConfig {
            program: "gpg".to_string(),
            home: Some(home.path().to_path_buf()),
            timeout_seconds: 30,
        });
        let body = "[myproject] 345: segfault\r\nModified issue, by fred\r\n";
        let unknown = KeyRef::Id("DEADBEEFDEADBEEF".to_string());
        let cipher_text = encryptor
            .encrypt(body, &[KeyRef::Armored(armored), unknown.clone()])
            .await
            .unwrap();
        assert!(cipher_text.armored.starts_with("-----BEGIN PGP MESSAGE-----"));
        assert_eq!(cipher_text.key_count, 1);
        assert_eq!(cipher_text.rejected, vec![unknown]);

        let cipher_file = home.path().join("message.asc");
        std::fs::write(&cipher_file, &cipher_text.armored).unwrap();
        let decrypted = gpg(
            home.path(),
            &["--decrypt", cipher_file.to_str().unwrap()],
        );
        assert!(decrypted.status.success());
        assert_eq!(decrypted.stdout, body.as_bytes());
    }
}
