//! Build configuration resolution
//!
//! Raw flags are validated once against the device capability table and
//! frozen into a `BuildConfig`. Nothing downstream looks at raw flags again.

mod layout;

pub use layout::{derive_layout, DerivedLayout, ModulePaths, ToolchainPaths};

use chrono::NaiveDateTime;
use serde::Serialize;
use sg_profile::{check_flags, is_reserved_label, Compiler, Device, FlagSet, ParseKindError, Variant, Violation};

/// Timestamp format embedded in artifact names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M";

/// Clean mode requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanMode {
    /// Run the clean target and stop.
    Only,
    /// Run the clean target, then build as usual.
    AndBuild,
}

/// Flags as given by the operator, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawFlags {
    pub build: String,
    pub device: String,
    pub compiler: String,
    pub version: String,
    pub cpuquiet: bool,
    pub overclock: bool,
    pub release: bool,
    pub notify: bool,
    pub upload: bool,
    pub verbose: bool,
    pub clean: Option<CleanMode>,
}

/// Toggles carried by a validated configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildFlags {
    pub overclock: bool,
    pub cpuquiet: bool,
    pub release: bool,
    pub notify: bool,
    pub upload: bool,
    pub verbose: bool,
}

/// Validated, immutable build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildConfig {
    pub device: Device,
    pub variant: Variant,
    pub compiler: Compiler,
    pub flags: BuildFlags,
    pub version_label: String,
    pub run_timestamp: NaiveDateTime,
    pub clean: Option<CleanMode>,
}

impl BuildConfig {
    /// Timestamp as it appears in artifact names.
    pub fn timestamp_tag(&self) -> String {
        self.run_timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Flag validation failures. Always fatal, always before any command runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Unknown(#[from] ParseKindError),

    #[error("incompatible flags: {}", describe(.0))]
    Capability(Vec<Violation>),

    #[error("version '{0}' can not be passed with --release")]
    ReservedLabel(String),

    #[error("version label must not be empty")]
    EmptyLabel,

    #[error("version label '{0}' contains characters not allowed in file names")]
    InvalidLabel(String),
}

impl ConfigError {
    /// Offending flag names, for capability failures.
    pub fn flags(&self) -> Vec<&'static str> {
        match self {
            ConfigError::Capability(violations) => violations.iter().map(|v| v.flag()).collect(),
            ConfigError::ReservedLabel(_) => vec!["release"],
            _ => Vec::new(),
        }
    }
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate raw flags and capture the run timestamp.
pub fn resolve(raw: &RawFlags) -> Result<BuildConfig, ConfigError> {
    resolve_at(raw, chrono::Local::now().naive_local())
}

/// Validate raw flags against a fixed run timestamp.
///
/// Pure: no filesystem access, no processes.
pub fn resolve_at(raw: &RawFlags, run_timestamp: NaiveDateTime) -> Result<BuildConfig, ConfigError> {
    let device: Device = raw.device.parse()?;
    let variant: Variant = raw.build.parse()?;
    let compiler: Compiler = raw.compiler.parse()?;

    let violations = check_flags(
        device,
        variant,
        FlagSet {
            overclock: raw.overclock,
            cpuquiet: raw.cpuquiet,
        },
    );
    if !violations.is_empty() {
        return Err(ConfigError::Capability(violations));
    }

    let version_label = raw.version.trim().to_string();
    if version_label.is_empty() {
        return Err(ConfigError::EmptyLabel);
    }
    if version_label
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
    {
        return Err(ConfigError::InvalidLabel(version_label));
    }
    if raw.release && is_reserved_label(&version_label) {
        return Err(ConfigError::ReservedLabel(version_label));
    }

    Ok(BuildConfig {
        device,
        variant,
        compiler,
        flags: BuildFlags {
            overclock: raw.overclock,
            cpuquiet: raw.cpuquiet,
            release: raw.release,
            notify: raw.notify,
            upload: raw.upload,
            verbose: raw.verbose,
        },
        version_label,
        run_timestamp,
        clean: raw.clean,
    })
}
