//! In-memory publish backends.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::publish::{
    FtpError, FtpMirror, Notifier, NotifyError, ObjectStore, RemoteFolder, StorageError, UploadedFile,
};
use crate::runner::CommandError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// An upload accepted by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub id: String,
    pub name: String,
    pub folder: String,
    pub size: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    folders: Vec<(String, RemoteFolder)>,
    uploads: Vec<StoredUpload>,
    fail_uploads: bool,
    next_id: u32,
}

/// Object store kept in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing folder.
    pub fn with_folder(self, name: &str, id: &str, parents: &[&str]) -> Self {
        lock(&self.state).folders.push((
            name.to_string(),
            RemoteFolder {
                id: id.to_string(),
                parents: parents.iter().map(|p| p.to_string()).collect(),
            },
        ));
        self
    }

    /// Make every upload fail with a 503.
    pub fn failing_uploads(self) -> Self {
        lock(&self.state).fail_uploads = true;
        self
    }

    pub fn uploads(&self) -> Vec<StoredUpload> {
        lock(&self.state).uploads.clone()
    }

    pub fn folders(&self) -> Vec<(String, RemoteFolder)> {
        lock(&self.state).folders.clone()
    }

    fn next_id(state: &mut StoreState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}{}", state.next_id)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn find_folders(&self, name: &str) -> Result<Vec<RemoteFolder>, StorageError> {
        Ok(lock(&self.state)
            .folders
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, f)| f.clone())
            .collect())
    }

    fn create_folder(&self, name: &str, parent: &str) -> Result<RemoteFolder, StorageError> {
        let mut state = lock(&self.state);
        let folder = RemoteFolder {
            id: Self::next_id(&mut state, "folder-"),
            parents: vec![parent.to_string()],
        };
        state.folders.push((name.to_string(), folder.clone()));
        Ok(folder)
    }

    fn upload_file(&self, path: &Path, name: &str, folder: &str) -> Result<UploadedFile, StorageError> {
        let mut state = lock(&self.state);
        if state.fail_uploads {
            return Err(StorageError::Status {
                status: 503,
                body: "backend unavailable".to_string(),
            });
        }
        let size = std::fs::metadata(path)
            .map_err(|source| StorageError::Io {
                path: path.display().to_string(),
                source,
            })?
            .len();
        let id = Self::next_id(&mut state, "file-");
        state.uploads.push(StoredUpload {
            id: id.clone(),
            name: name.to_string(),
            folder: folder.to_string(),
            size,
        });
        Ok(UploadedFile {
            id,
            name: name.to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct FtpState {
    stored: Vec<String>,
    deleted: Vec<String>,
    fail_store: bool,
    store_calls: usize,
}

/// FTP mirror bookkeeping. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeFtp {
    state: Arc<Mutex<FtpState>>,
}

impl FakeFtp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every store fail as if the transfer broke midway.
    pub fn failing(self) -> Self {
        lock(&self.state).fail_store = true;
        self
    }

    pub fn stored(&self) -> Vec<String> {
        lock(&self.state).stored.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    /// Store attempts, successful or not.
    pub fn store_calls(&self) -> usize {
        lock(&self.state).store_calls
    }
}

impl FtpMirror for FakeFtp {
    fn store(&self, _local: &Path, remote_name: &str) -> Result<(), FtpError> {
        let mut state = lock(&self.state);
        state.store_calls += 1;
        if state.fail_store {
            return Err(FtpError::Command(CommandError::Failed {
                command: format!("curl -T {remote_name}"),
                code: Some(55),
                stdout: None,
                stderr: Some("Failed sending data to the peer".to_string()),
            }));
        }
        state.stored.push(remote_name.to_string());
        Ok(())
    }

    fn delete(&self, remote_name: &str) -> Result<(), FtpError> {
        let mut state = lock(&self.state);
        state.deleted.push(remote_name.to_string());
        state.stored.retain(|n| n != remote_name);
        Ok(())
    }

    fn remote_path(&self, remote_name: &str) -> String {
        format!("ftp://fake/{remote_name}")
    }
}

#[derive(Debug, Default)]
struct NotifierState {
    messages: Vec<String>,
    fail: bool,
}

/// Captures notification text. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send is recorded, then rejected.
    pub fn failing(self) -> Self {
        lock(&self.state).fail = true;
        self
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.state).messages.clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, text: &str) -> Result<(), NotifyError> {
        let mut state = lock(&self.state);
        state.messages.push(text.to_string());
        if state.fail {
            return Err(NotifyError::Rejected);
        }
        Ok(())
    }
}
