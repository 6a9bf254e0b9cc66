//! FTP mirror driven through `curl`.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::runner::{CommandError, CommandRunner, CommandSpec};

#[derive(Debug, Error)]
pub enum FtpError {
    #[error("FTP transfer failed: {0}")]
    Command(#[from] CommandError),
}

/// Store/delete remote files.
pub trait FtpMirror: Send + Sync {
    fn store(&self, local: &Path, remote_name: &str) -> Result<(), FtpError>;

    fn delete(&self, remote_name: &str) -> Result<(), FtpError>;

    /// Remote location a stored file ends up at.
    fn remote_path(&self, remote_name: &str) -> String;
}

pub struct CurlFtp {
    runner: Arc<dyn CommandRunner>,
    host: String,
    user: String,
    password: String,
    remote_dir: String,
}

impl CurlFtp {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        remote_dir: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            host: host.into(),
            user: user.into(),
            password: password.into(),
            remote_dir: remote_dir.into(),
        }
    }

    fn dir_url(&self) -> String {
        let dir = self.remote_dir.trim_matches('/');
        if dir.is_empty() {
            format!("ftp://{}/", self.host)
        } else {
            format!("ftp://{}/{}/", self.host, dir)
        }
    }

    fn curl(&self) -> CommandSpec {
        CommandSpec::new("curl")
            .args(["--fail", "--silent", "--show-error"])
            .arg("--user")
            .secret_arg(format!("{}:{}", self.user, self.password))
    }

    pub fn store_command(&self, local: &Path, remote_name: &str) -> CommandSpec {
        self.curl()
            .arg("--ftp-create-dirs")
            .arg("-T")
            .arg(local.to_string_lossy())
            .arg(format!("{}{}", self.dir_url(), remote_name))
    }

    pub fn delete_command(&self, remote_name: &str) -> CommandSpec {
        self.curl()
            .arg("-Q")
            .arg(format!("DELE {remote_name}"))
            .arg(self.dir_url())
    }
}

impl FtpMirror for CurlFtp {
    fn store(&self, local: &Path, remote_name: &str) -> Result<(), FtpError> {
        info!(host = %self.host, file = remote_name, "uploading to FTP mirror");
        self.runner.capture(&self.store_command(local, remote_name))?;
        Ok(())
    }

    fn delete(&self, remote_name: &str) -> Result<(), FtpError> {
        info!(host = %self.host, file = remote_name, "deleting from FTP mirror");
        self.runner.capture(&self.delete_command(remote_name))?;
        Ok(())
    }

    fn remote_path(&self, remote_name: &str) -> String {
        format!("{}{}", self.dir_url(), remote_name)
    }
}
