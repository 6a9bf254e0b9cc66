//! Shared fixtures for integration tests
//!
//! A `Workspace` is a throwaway home directory with credential files and a
//! kernel workspace underneath it. `seed` lays out what a finished build
//! would leave behind: source tree, output tree with image and module, and
//! an AnyKernel staging tree.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use tempfile::TempDir;

use stormguard_build::config::Settings;
use stormguard_build::resolve::{derive_layout, resolve_at, BuildConfig, DerivedLayout, RawFlags};

pub const KEYSTORE_PASSWORD: &str = "storepass-123";

pub struct Workspace {
    _temp: TempDir,
    pub home: PathBuf,
    pub root: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("home");
        let root = home.join("kernel");
        fs::create_dir_all(&root).unwrap();

        fs::write(home.join("keystore_password"), format!("storepass={KEYSTORE_PASSWORD}\n")).unwrap();
        fs::write(home.join("token"), "123456:bot-token\n").unwrap();
        fs::write(home.join("pass"), "ftp-password\n").unwrap();
        fs::create_dir_all(home.join(".config/stormguard")).unwrap();
        fs::write(home.join(".config/stormguard/drive_token"), "drive-token\n").unwrap();

        Self {
            _temp: temp,
            home,
            root,
        }
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::defaults(&self.home);
        settings.workspace_root = self.root.clone();
        settings
    }

    pub fn layout(&self, config: &BuildConfig) -> DerivedLayout {
        derive_layout(config, &self.root)
    }

    /// Create the trees a finished build leaves behind.
    pub fn seed(&self, layout: &DerivedLayout) {
        fs::create_dir_all(layout.source_tree.join(".git")).unwrap();
        fs::write(layout.source_tree.join("Makefile"), "# kernel\n").unwrap();

        let image = &layout.kernel_image;
        fs::create_dir_all(image.parent().unwrap()).unwrap();
        fs::write(image, b"kernel-image-bytes").unwrap();

        if let Some(module) = &layout.module {
            fs::create_dir_all(module.built.parent().unwrap()).unwrap();
            fs::write(&module.built, b"wlan-module").unwrap();
        }

        let staging = &layout.staging_tree;
        fs::create_dir_all(staging.join("META-INF/com/google/android")).unwrap();
        fs::write(staging.join("anykernel.sh"), "#!/sbin/sh\n").unwrap();
        fs::write(
            staging.join("META-INF/com/google/android/update-binary"),
            "#!/sbin/sh\n",
        )
        .unwrap();
        fs::create_dir_all(staging.join("patch")).unwrap();
        fs::create_dir_all(staging.join(".git")).unwrap();
        fs::write(staging.join(".git/HEAD"), "ref: refs/heads/master\n").unwrap();
        fs::write(staging.join(".gitignore"), "*.zip\n").unwrap();
        fs::write(staging.join("README.md"), "AnyKernel2\n").unwrap();
    }

    pub fn lock_path(&self, device: &str) -> PathBuf {
        self.root.join("build").join(format!(".{device}.lock"))
    }
}

pub fn run_timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2019, 6, 1)
        .unwrap()
        .and_hms_opt(21, 5, 0)
        .unwrap()
}

/// Flags for `device`/`build` with gcc, label `r12`, everything else off.
pub fn raw(device: &str, build: &str) -> RawFlags {
    RawFlags {
        build: build.to_string(),
        device: device.to_string(),
        compiler: "gcc".to_string(),
        version: "r12".to_string(),
        cpuquiet: device == "mido",
        ..Default::default()
    }
}

pub fn config(raw: &RawFlags) -> BuildConfig {
    resolve_at(raw, run_timestamp()).unwrap()
}

/// Whether any path component of a zip entry is hidden.
pub fn has_hidden_component(entry: &str) -> bool {
    entry
        .split('/')
        .any(|part| part.starts_with('.'))
}

pub fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"").unwrap();
}
