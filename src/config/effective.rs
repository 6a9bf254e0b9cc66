//! Effective settings with provenance
//!
//! Records which layers contributed to the merged settings and the digest of
//! every file that was read.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use super::defaults::Settings;
use super::merge::merge_layers;

/// Host settings file, relative to the operator's home directory.
pub const HOST_SETTINGS_PATH: &str = ".config/stormguard/build.toml";

/// Key names whose values are never echoed back.
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "api_key"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SettingsOrigin {
    Builtin,
    Host,
    Cli,
}

/// A contributing settings layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsSource {
    pub origin: SettingsOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged settings plus the layers that produced them.
#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub settings: Settings,
    pub sources: Vec<SettingsSource>,
    merged: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

impl EffectiveSettings {
    /// Default host settings path for `home`.
    pub fn host_path(home: &Path) -> PathBuf {
        home.join(HOST_SETTINGS_PATH)
    }

    /// Merge built-in defaults, an optional host file and CLI overrides.
    ///
    /// A host path that does not exist is skipped.
    pub fn build(
        home: &Path,
        host_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, SettingsError> {
        let mut layers = vec![Settings::defaults(home).to_value()];
        let mut sources = vec![SettingsSource {
            origin: SettingsOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = host_path.filter(|p| p.exists()) {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(SettingsSource {
                origin: SettingsOrigin::Host,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(SettingsSource {
                origin: SettingsOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let settings: Settings = serde_json::from_value(merged.clone())
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;

        if settings.make.jobs == 0 {
            return Err(SettingsError::Invalid("make.jobs must be at least 1".to_string()));
        }

        Ok(Self {
            settings,
            sources,
            merged,
        })
    }

    /// JSON view with provenance, secrets redacted.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut settings = self.merged.clone();
        let redactions = redact(&mut settings, "");
        serde_json::to_string_pretty(&serde_json::json!({
            "settings": settings,
            "sources": self.sources,
            "redactions": redactions,
        }))
    }
}

fn load_toml_file(path: &Path) -> Result<(Value, String), SettingsError> {
    let bytes = fs::read(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let digest = hex::encode(Sha256::digest(&bytes));

    let text = String::from_utf8(bytes).map_err(|e| SettingsError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    // toml values convert straight into serde_json values
    let value: Value = toml::from_str(&text).map_err(|e| SettingsError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok((value, digest))
}

/// Replace secret-looking values; returns the redacted key paths.
fn redact(value: &mut Value, prefix: &str) -> Vec<String> {
    let mut redacted = Vec::new();
    if let Value::Object(map) = value {
        for (key, child) in map.iter_mut() {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            if SECRET_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                *child = Value::String("[REDACTED]".to_string());
                redacted.push(path);
            } else {
                redacted.extend(redact(child, &path));
            }
        }
    }
    redacted
}
