//! Credential files
//!
//! Secrets live in small files under the operator's home directory and are
//! read once, before any external command runs. This module never writes
//! them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CredentialFiles;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential file missing: {0}")]
    Missing(PathBuf),

    #[error("credential file {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("failed to read credential file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which optional secrets a run needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialNeeds {
    pub bot_token: bool,
    /// Object-storage token
    pub storage: bool,
    /// FTP password, only for release uploads that go through the mirror
    pub ftp: bool,
}

/// Secrets loaded for one run.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Keystore password for archive signing
    pub keystore_password: String,
    pub bot_token: Option<String>,
    pub ftp_password: Option<String>,
    pub storage_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("keystore_password", &"[REDACTED]")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("ftp_password", &self.ftp_password.as_ref().map(|_| "[REDACTED]"))
            .field("storage_token", &self.storage_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Credentials {
    /// Load the keystore password plus whatever `needs` asks for.
    pub fn load(home: &Path, files: &CredentialFiles, needs: CredentialNeeds) -> Result<Self, CredentialError> {
        let keystore_password = read_key_value(&home.join(&files.keystore_password))?;

        let bot_token = if needs.bot_token {
            Some(read_first_line(&home.join(&files.bot_token))?)
        } else {
            None
        };

        let ftp_password = if needs.ftp {
            Some(read_first_line(&home.join(&files.ftp_password))?)
        } else {
            None
        };

        let storage_token = if needs.storage {
            Some(read_first_line(&home.join(&files.storage_token))?)
        } else {
            None
        };

        Ok(Self {
            keystore_password,
            bot_token,
            ftp_password,
            storage_token,
        })
    }

    /// Best-effort token load for failure reports; never fails.
    pub fn bot_token_only(home: &Path, files: &CredentialFiles) -> Option<String> {
        read_first_line(&home.join(&files.bot_token)).ok()
    }
}

fn read(path: &Path) -> Result<String, CredentialError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(CredentialError::Missing(path.to_path_buf()))
        }
        Err(source) => Err(CredentialError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// First line of the file, trimmed; an empty value counts as missing.
fn read_first_line(path: &Path) -> Result<String, CredentialError> {
    let text = read(path)?;
    match text.lines().next().map(str::trim) {
        Some(line) if !line.is_empty() => Ok(line.to_string()),
        _ => Err(CredentialError::Missing(path.to_path_buf())),
    }
}

/// Value of a `key=value` first line.
fn read_key_value(path: &Path) -> Result<String, CredentialError> {
    let line = read_first_line(path)?;
    match line.split_once('=') {
        Some((_, value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(_) => Err(CredentialError::Missing(path.to_path_buf())),
        None => Err(CredentialError::Malformed {
            path: path.to_path_buf(),
            reason: "expected key=value".to_string(),
        }),
    }
}
