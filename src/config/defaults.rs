//! Built-in defaults (layer 1) and the typed settings they populate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sg_profile::Device;

/// Fully merged operator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Root holding sources, toolchains, staging trees and build output.
    pub workspace_root: PathBuf,
    pub make: MakeSettings,
    pub signer: SignerSettings,
    pub credentials: CredentialFiles,
    pub storage: StorageSettings,
    pub ftp: FtpSettings,
    pub notify: NotifySettings,
    pub archive: ArchiveSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakeSettings {
    /// Parallel make jobs.
    pub jobs: u32,
    /// Wrap compilers with ccache.
    pub ccache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignerSettings {
    /// Archive signing program.
    pub program: String,
    /// Keystore, relative to the workspace root unless absolute.
    pub keystore: PathBuf,
    /// Key alias inside the keystore.
    pub alias: String,
}

/// Credential file locations, relative to the operator's home directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialFiles {
    pub keystore_password: PathBuf,
    pub bot_token: PathBuf,
    pub ftp_password: PathBuf,
    pub storage_token: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub api_base: String,
    pub folders: FolderSettings,
}

/// Parent folder identifiers on the object-storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSettings {
    pub cpuquiet: String,
    /// Per-device parents, keyed by device name
    pub devices: BTreeMap<String, String>,
}

impl FolderSettings {
    pub fn for_device(&self, device: Device) -> Option<&str> {
        self.devices.get(device.as_str()).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtpSettings {
    pub host: String,
    pub user: String,
    pub remote_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifySettings {
    pub api_base: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSettings {
    /// Extra glob patterns kept out of the archive.
    pub exclude: Vec<String>,
}

impl Settings {
    /// Built-in defaults for an operator whose home directory is `home`.
    pub fn defaults(home: &Path) -> Self {
        Self {
            workspace_root: home.join("kernel"),
            make: MakeSettings {
                jobs: 4,
                ccache: true,
            },
            signer: SignerSettings {
                program: "jarsigner".to_string(),
                keystore: PathBuf::from("keystore/stormguard.jks"),
                alias: "stormguard".to_string(),
            },
            credentials: CredentialFiles {
                keystore_password: PathBuf::from("keystore_password"),
                bot_token: PathBuf::from("token"),
                ftp_password: PathBuf::from("pass"),
                storage_token: PathBuf::from(".config/stormguard/drive_token"),
            },
            storage: StorageSettings {
                api_base: "https://www.googleapis.com".to_string(),
                folders: FolderSettings {
                    cpuquiet: "1i5XRVcO3Q8y8OFAOxXU-UWGWmQJiKo2u".to_string(),
                    devices: [
                        ("mido", "1fkEmVBKD0cHMY1kbkpr4Bwm9v3COPPjf"),
                        ("whyred", "1YjsSb1JYqWOANua07kd_UN4q2vPoq1iv"),
                    ]
                    .into_iter()
                    .map(|(device, id)| (device.to_string(), id.to_string()))
                    .collect(),
                },
            },
            ftp: FtpSettings {
                host: "uploads.androidfilehost.com".to_string(),
                user: "stormguard".to_string(),
                remote_dir: "/".to_string(),
            },
            notify: NotifySettings {
                api_base: "https://api.telegram.org".to_string(),
                chat_id: "-1001354431412".to_string(),
            },
            archive: ArchiveSettings {
                exclude: Vec::new(),
            },
        }
    }

    /// Serialize to a JSON value for merging.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Keystore path with relative entries anchored at the workspace root.
    pub fn keystore_path(&self) -> PathBuf {
        if self.signer.keystore.is_absolute() {
            self.signer.keystore.clone()
        } else {
            self.workspace_root.join(&self.signer.keystore)
        }
    }
}
