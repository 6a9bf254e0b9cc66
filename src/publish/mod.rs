//! Publishing
//!
//! Decides which backends receive the archive, uploads it, and announces
//! object-storage uploads in the chat.
//!
//! | cpuquiet | release | action |
//! |---|---|---|
//! | yes | any | object storage under the cpuquiet parent |
//! | no | yes | FTP mirror, then object storage under the device parent |
//! | no | no | object storage under the device parent |

pub mod checksum;
pub mod ftp;
pub mod notify;
pub mod storage;

pub use checksum::sha256_file;
pub use ftp::{CurlFtp, FtpError, FtpMirror};
pub use notify::{failure_message, success_message, Notifier, NotifyError, TelegramNotifier};
pub use storage::{download_link, DriveClient, ObjectStore, RemoteFolder, StorageError, UploadedFile};

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::FolderSettings;
use crate::resolve::{BuildConfig, DerivedLayout};
use crate::runner::CommandError;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("archive not found: {0}")]
    NotFound(PathBuf),

    #[error("object storage upload failed: {0}")]
    Storage(#[from] StorageError),

    #[error("FTP upload failed: {0}")]
    Ftp(#[from] FtpError),

    #[error("no object-storage parent folder configured for device {0}")]
    NoParentFolder(String),

    #[error("release upload needs an FTP mirror but none is configured")]
    FtpUnavailable,

    #[error("folder '{name}' ({id}) is not under the expected parent {expected} (parents: {found:?})")]
    FolderParentMismatch {
        name: String,
        id: String,
        expected: String,
        found: Vec<String>,
    },
}

impl PublishError {
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            PublishError::Ftp(FtpError::Command(e)) => Some(e),
            _ => None,
        }
    }
}

/// Which backends a run uploads to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "plan")]
pub enum PublishPlan {
    ObjectStoreOnly { parent: String },
    FtpThenMirror { parent: String },
}

impl PublishPlan {
    pub fn for_config(config: &BuildConfig, folders: &FolderSettings) -> Result<Self, PublishError> {
        if config.flags.cpuquiet {
            return Ok(PublishPlan::ObjectStoreOnly {
                parent: folders.cpuquiet.clone(),
            });
        }
        let parent = folders
            .for_device(config.device)
            .ok_or_else(|| PublishError::NoParentFolder(config.device.to_string()))?
            .to_string();
        if config.flags.release {
            Ok(PublishPlan::FtpThenMirror { parent })
        } else {
            Ok(PublishPlan::ObjectStoreOnly { parent })
        }
    }

    pub fn uses_ftp(&self) -> bool {
        matches!(self, PublishPlan::FtpThenMirror { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    ObjectStorage,
    FtpMirror,
}

/// Where the archive went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishTarget {
    pub kind: BackendKind,
    /// Folder id or remote URL
    pub destination: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    pub targets: Vec<PublishTarget>,
    pub sha256: Option<String>,
    pub notified: bool,
}

pub struct PublishPipeline {
    store: Arc<dyn ObjectStore>,
    ftp: Option<Arc<dyn FtpMirror>>,
    notifier: Option<Arc<dyn Notifier>>,
    folders: FolderSettings,
}

impl PublishPipeline {
    pub fn new(store: Arc<dyn ObjectStore>, folders: FolderSettings) -> Self {
        Self {
            store,
            ftp: None,
            notifier: None,
            folders,
        }
    }

    pub fn with_ftp(mut self, ftp: Arc<dyn FtpMirror>) -> Self {
        self.ftp = Some(ftp);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn publish(&self, config: &BuildConfig, layout: &DerivedLayout) -> Result<PublishReport, PublishError> {
        if !layout.archive_path.is_file() {
            return Err(PublishError::NotFound(layout.archive_path.clone()));
        }

        let plan = PublishPlan::for_config(config, &self.folders)?;
        info!(?plan, archive = %layout.archive_name, "publishing");
        let mut report = PublishReport::default();

        let parent = match plan {
            PublishPlan::ObjectStoreOnly { parent } => parent,
            PublishPlan::FtpThenMirror { parent } => {
                let ftp = self.ftp.as_deref().ok_or(PublishError::FtpUnavailable)?;
                if let Err(e) = ftp.store(&layout.archive_path, &layout.archive_name) {
                    warn!(error = %e, "FTP upload failed, removing partial upload");
                    if let Err(cleanup) = ftp.delete(&layout.archive_name) {
                        warn!(error = %cleanup, "failed to remove partial FTP upload");
                    }
                    return Err(e.into());
                }
                report.targets.push(PublishTarget {
                    kind: BackendKind::FtpMirror,
                    destination: ftp.remote_path(&layout.archive_name),
                    link: None,
                });
                parent
            }
        };

        let folder = self.resolve_folder(&config.version_label, &parent)?;
        info!(folder = %folder, "uploading to object storage");
        let uploaded = self
            .store
            .upload_file(&layout.archive_path, &layout.archive_name, &folder)?;
        let link = download_link(&uploaded.id);
        report.targets.push(PublishTarget {
            kind: BackendKind::ObjectStorage,
            destination: folder,
            link: Some(link.clone()),
        });

        if config.flags.notify {
            self.announce(config, layout, &link, &mut report);
        }

        Ok(report)
    }

    /// Reuse the version folder that sits under `parent`, else create it.
    ///
    /// Same-named folders under other parents are left alone; only a name
    /// that exists exclusively elsewhere is an error.
    fn resolve_folder(&self, name: &str, parent: &str) -> Result<String, PublishError> {
        let matches = self.store.find_folders(name)?;
        if let Some(folder) = matches.iter().find(|f| f.parents.iter().any(|p| p == parent)) {
            return Ok(folder.id.clone());
        }
        match matches.into_iter().next() {
            None => {
                info!(name, parent, "creating version folder");
                Ok(self.store.create_folder(name, parent)?.id)
            }
            Some(folder) => Err(PublishError::FolderParentMismatch {
                name: name.to_string(),
                id: folder.id,
                expected: parent.to_string(),
                found: folder.parents,
            }),
        }
    }

    /// Best effort: failures are logged and never fail the publish.
    fn announce(&self, config: &BuildConfig, layout: &DerivedLayout, link: &str, report: &mut PublishReport) {
        let Some(notifier) = self.notifier.as_deref() else {
            warn!("notification requested but no notifier is configured");
            return;
        };
        let sha256 = match sha256_file(&layout.archive_path) {
            Ok(sum) => sum,
            Err(e) => {
                warn!(error = %e, "failed to checksum archive, skipping notification");
                return;
            }
        };
        let text = success_message(config, layout, &sha256, link);
        report.sha256 = Some(sha256);
        match notifier.send(&text) {
            Ok(()) => report.notified = true,
            Err(e) => warn!(error = %e, "failed to send notification"),
        }
    }
}
