//! Object storage backend (Drive v3 REST).

use std::fs::File;
use std::path::Path;

use reqwest::blocking::{Body, Client};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A remote folder and the folders that contain it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Folder-then-file object storage.
pub trait ObjectStore: Send + Sync {
    /// Every folder with this exact name, wherever it lives.
    fn find_folders(&self, name: &str) -> Result<Vec<RemoteFolder>, StorageError>;

    fn create_folder(&self, name: &str, parent: &str) -> Result<RemoteFolder, StorageError>;

    fn upload_file(&self, path: &Path, name: &str, folder: &str) -> Result<UploadedFile, StorageError>;
}

/// Public download link for an uploaded file.
pub fn download_link(file_id: &str) -> String {
    format!("https://drive.google.com/uc?id={file_id}&export=download")
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFolder>,
}

/// Blocking Drive v3 client authenticated with a bearer token.
pub struct DriveClient {
    client: Client,
    api_base: String,
    token: String,
}

impl DriveClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.api_base)
    }
}

fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(StorageError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Escape a value for a Drive query string literal.
fn quote_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

impl ObjectStore for DriveClient {
    fn find_folders(&self, name: &str) -> Result<Vec<RemoteFolder>, StorageError> {
        let q = format!(
            "name = '{}' and mimeType = '{FOLDER_MIME}' and trashed = false",
            quote_query(name)
        );
        let response = self
            .client
            .get(self.files_url())
            .bearer_auth(&self.token)
            .query(&[("q", q.as_str()), ("fields", "files(id,parents)")])
            .send()?;
        let list: FileList = check(response)?.json()?;
        debug!(name, found = list.files.len(), "folder lookup");
        Ok(list.files)
    }

    fn create_folder(&self, name: &str, parent: &str) -> Result<RemoteFolder, StorageError> {
        let response = self
            .client
            .post(self.files_url())
            .bearer_auth(&self.token)
            .query(&[("fields", "id,parents")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME,
                "parents": [parent],
            }))
            .send()?;
        Ok(check(response)?.json()?)
    }

    fn upload_file(&self, path: &Path, name: &str, folder: &str) -> Result<UploadedFile, StorageError> {
        let file = File::open(path).map_err(|source| StorageError::Io {
            path: path.display().to_string(),
            source,
        })?;

        // Media upload, then name and parent in a metadata update
        let response = self
            .client
            .post(format!("{}/upload/drive/v3/files", self.api_base))
            .bearer_auth(&self.token)
            .query(&[("uploadType", "media"), ("fields", "id")])
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(Body::new(file))
            .send()?;
        let uploaded: UploadedFile = check(response)?.json()?;

        let response = self
            .client
            .patch(format!("{}/{}", self.files_url(), uploaded.id))
            .bearer_auth(&self.token)
            .query(&[("addParents", folder), ("fields", "id,name")])
            .json(&json!({ "name": name }))
            .send()?;
        Ok(check(response)?.json()?)
    }
}
