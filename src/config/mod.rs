//! Operator settings
//!
//! Settings are merged from three layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Host file (~/.config/stormguard/build.toml)
//! 3. CLI overrides
//!
//! Build flags are not settings: they are resolved separately into an
//! immutable `BuildConfig`.

mod defaults;
mod effective;
mod merge;

pub use defaults::{
    ArchiveSettings, CredentialFiles, FolderSettings, FtpSettings, MakeSettings, NotifySettings,
    Settings, SignerSettings, StorageSettings,
};
pub use effective::{EffectiveSettings, SettingsError, SettingsOrigin, SettingsSource};
pub use merge::{deep_merge, merge_layers};
