//! Exclusion rules for archive contents
//!
//! Hidden entries are always excluded; extra patterns come from settings.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Patterns excluded from every archive
const HIDDEN_EXCLUDES: &[&str] = &[".*", "**/.*"];

#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("invalid exclude pattern: {0}")]
    Glob(#[from] globset::Error),
}

/// Exclusion rules for filtering staging entries
#[derive(Debug)]
pub struct ExcludeRules {
    glob_set: GlobSet,
}

impl ExcludeRules {
    /// Hidden-entry rules only
    pub fn new() -> Result<Self, ExcludeError> {
        Self::with_patterns::<&str>(&[])
    }

    /// Hidden-entry rules plus additional patterns
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ExcludeError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in HIDDEN_EXCLUDES {
            builder.add(Glob::new(pattern)?);
        }
        for pattern in patterns.iter().map(AsRef::as_ref) {
            if !pattern.is_empty() {
                builder.add(Glob::new(pattern)?);
            }
        }
        Ok(Self {
            glob_set: builder.build()?,
        })
    }

    /// Check a path relative to the staging root
    pub fn is_excluded(&self, rel_path: &Path) -> bool {
        is_hidden(rel_path) || self.glob_set.is_match(rel_path)
    }
}

/// Whether the final component starts with the hidden-file marker.
#[cfg(unix)]
pub fn is_hidden(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;
    path.file_name()
        .map(|n| n.as_bytes().first() == Some(&b'.'))
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}
