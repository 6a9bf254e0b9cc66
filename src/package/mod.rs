//! Artifact packaging
//!
//! Stages the kernel image (and the signed wlan module, for variants that
//! ship one) into the AnyKernel staging tree, zips the tree and signs the
//! archive.

mod archive;
mod exclude;

pub use archive::{list_entries, write_zip};
pub use exclude::{is_hidden, ExcludeError, ExcludeRules};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::resolve::{BuildConfig, DerivedLayout};
use crate::runner::{CommandError, CommandRunner, CommandSpec};

/// Banner file written into the staging tree for release uploads.
pub const BANNER_FILE: &str = "banner";

/// Environment variable carrying the keystore password to the signer.
pub const KEYSTORE_PASS_ENV: &str = "SG_KEYSTORE_PASS";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("{what} not found: {path}")]
    NotFound { what: &'static str, path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk staging tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Exclude(#[from] ExcludeError),

    #[error("{step} failed: {source}")]
    Command {
        step: &'static str,
        #[source]
        source: CommandError,
    },
}

impl PackageError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        PackageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            PackageError::Command { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// How the archive gets signed.
#[derive(Debug, Clone)]
pub struct ArchiveSigner {
    pub program: String,
    pub keystore: PathBuf,
    pub alias: String,
    pub password: String,
}

impl ArchiveSigner {
    /// The signing invocation; the password travels in the environment.
    pub fn command(&self, archive: &Path) -> CommandSpec {
        CommandSpec::new(self.program.as_str())
            .arg("-keystore")
            .arg(self.keystore.to_string_lossy())
            .arg("-storepass:env")
            .arg(KEYSTORE_PASS_ENV)
            .arg(archive.to_string_lossy())
            .arg(self.alias.as_str())
            .env(KEYSTORE_PASS_ENV, self.password.as_str())
    }
}

/// Result of a packaging run.
#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub archive_path: PathBuf,
    /// Entry names written into the archive
    pub entries: Vec<String>,
    pub module_installed: Option<PathBuf>,
}

/// Removes the banner file when dropped.
struct BannerGuard {
    path: PathBuf,
}

impl BannerGuard {
    fn write(path: PathBuf, text: &str) -> Result<Self, PackageError> {
        fs::write(&path, text).map_err(|e| PackageError::io(&path, e))?;
        debug!(path = %path.display(), "banner written");
        Ok(Self { path })
    }
}

impl Drop for BannerGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove banner");
            }
        }
    }
}

pub struct ArtifactPackager {
    runner: Arc<dyn CommandRunner>,
    signer: ArchiveSigner,
    exclude: Vec<String>,
}

impl ArtifactPackager {
    pub fn new(runner: Arc<dyn CommandRunner>, signer: ArchiveSigner) -> Self {
        Self {
            runner,
            signer,
            exclude: Vec::new(),
        }
    }

    /// Extra exclude patterns on top of the hidden-entry rule.
    pub fn with_excludes(mut self, patterns: Vec<String>) -> Self {
        self.exclude = patterns;
        self
    }

    pub fn package(&self, config: &BuildConfig, layout: &DerivedLayout) -> Result<PackageReport, PackageError> {
        let rules = ExcludeRules::with_patterns(&self.exclude)?;
        if !layout.staging_tree.is_dir() {
            return Err(PackageError::NotFound {
                what: "staging tree",
                path: layout.staging_tree.clone(),
            });
        }

        self.clear_staging(layout)?;
        self.stage_image(layout)?;
        let module_installed = self.stage_module(layout)?;

        let entries = {
            let _banner = if config.flags.release && config.flags.upload {
                Some(BannerGuard::write(
                    layout.staging_tree.join(BANNER_FILE),
                    &banner_text(config, layout),
                )?)
            } else {
                None
            };
            info!(archive = %layout.archive_path.display(), "creating archive");
            write_zip(&layout.staging_tree, &layout.archive_path, &rules)?
        };

        if !layout.archive_path.is_file() {
            return Err(PackageError::NotFound {
                what: "archive",
                path: layout.archive_path.clone(),
            });
        }
        info!(archive = %layout.archive_name, "signing archive");
        self.runner
            .capture(&self.signer.command(&layout.archive_path))
            .map_err(|source| PackageError::Command {
                step: "archive signing",
                source,
            })?;

        Ok(PackageReport {
            archive_path: layout.archive_path.clone(),
            entries,
            module_installed,
        })
    }

    /// Remove images, modules and a banner left by an earlier run.
    fn clear_staging(&self, layout: &DerivedLayout) -> Result<(), PackageError> {
        remove_if_present(&layout.staged_image)?;
        // An interrupted run can exit before the banner guard drops
        remove_if_present(&layout.staging_tree.join(BANNER_FILE))?;

        if let Some(module) = &layout.module {
            remove_if_present(&module.installed)?;
            if module.install_dir.is_dir() {
                let entries = fs::read_dir(&module.install_dir).map_err(|e| PackageError::io(&module.install_dir, e))?;
                for entry in entries {
                    let path = entry.map_err(|e| PackageError::io(&module.install_dir, e))?.path();
                    if path.extension().is_some_and(|ext| ext == "ko") {
                        remove_if_present(&path)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn stage_image(&self, layout: &DerivedLayout) -> Result<(), PackageError> {
        if !layout.kernel_image.is_file() {
            return Err(PackageError::NotFound {
                what: "kernel image",
                path: layout.kernel_image.clone(),
            });
        }
        fs::copy(&layout.kernel_image, &layout.staged_image).map_err(|e| PackageError::io(&layout.staged_image, e))?;
        debug!(image = %layout.staged_image.display(), "kernel image staged");
        Ok(())
    }

    /// Strip, sign and install the module. Returns its installed path.
    fn stage_module(&self, layout: &DerivedLayout) -> Result<Option<PathBuf>, PackageError> {
        let Some(module) = &layout.module else {
            return Ok(None);
        };
        if !module.built.is_file() {
            return Err(PackageError::NotFound {
                what: "kernel module",
                path: module.built.clone(),
            });
        }

        let built = module.built.to_string_lossy();
        let strip = CommandSpec::new(layout.toolchain.strip.to_string_lossy())
            .args(["--strip-debug", "--strip-unneeded"])
            .arg(built.as_ref());
        self.runner.capture(&strip).map_err(|source| PackageError::Command {
            step: "module strip",
            source,
        })?;

        let out = &layout.output_tree;
        let sign = CommandSpec::new(out.join("scripts/sign-file").to_string_lossy())
            .arg("sha512")
            .arg(out.join("certs/signing_key.pem").to_string_lossy())
            .arg(out.join("certs/signing_key.x509").to_string_lossy())
            .arg(built.as_ref());
        self.runner.capture(&sign).map_err(|source| PackageError::Command {
            step: "module signing",
            source,
        })?;

        fs::create_dir_all(&module.install_dir).map_err(|e| PackageError::io(&module.install_dir, e))?;
        fs::copy(&module.built, &module.installed).map_err(|e| PackageError::io(&module.installed, e))?;
        info!(module = %module.installed.display(), "module installed");
        Ok(Some(module.installed.clone()))
    }
}

fn remove_if_present(path: &Path) -> Result<(), PackageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PackageError::io(path, e)),
    }
}

/// Text shown by the installer for release builds.
pub fn banner_text(config: &BuildConfig, layout: &DerivedLayout) -> String {
    format!(
        "Stormguard Kernel\nDevice: {}\nVersion: {}\nCompiler: {}\nBuilt: {}\n",
        config.device,
        layout.version_name,
        config.compiler,
        config.timestamp_tag()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signer_command_keeps_password_out_of_argv() {
        let signer = ArchiveSigner {
            program: "jarsigner".into(),
            keystore: PathBuf::from("/k/keystore/sg.jks"),
            alias: "stormguard".into(),
            password: "hunter2".into(),
        };
        let cmd = signer.command(Path::new("/k/out/Stormguard.zip"));

        assert_eq!(
            cmd.display(),
            "jarsigner -keystore /k/keystore/sg.jks -storepass:env SG_KEYSTORE_PASS /k/out/Stormguard.zip stormguard"
        );
        assert!(!cmd.get_args().iter().any(|a| a.contains("hunter2")));
        assert_eq!(cmd.env_vars(), &[("SG_KEYSTORE_PASS".to_string(), "hunter2".to_string())]);
    }

    #[test]
    fn test_banner_guard_removes_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join(BANNER_FILE);
        {
            let _guard = BannerGuard::write(path.clone(), "hello").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_if_present_tolerates_missing() {
        let temp = tempfile::TempDir::new().unwrap();
        remove_if_present(&temp.path().join("nothing")).unwrap();
    }
}
