//! Capability checks applied before anything runs.

use std::fmt;

use crate::kind::{Device, Variant};
use crate::table::profile;

/// Pre-release labels that may never be published as a release.
pub const RESERVED_LABELS: &[&str] = &["beta", "test", "personal"];

/// Whether a version label is one of the reserved pre-release labels.
pub fn is_reserved_label(label: &str) -> bool {
    RESERVED_LABELS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(label.trim()))
}

/// Device-constrained feature flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagSet {
    pub overclock: bool,
    pub cpuquiet: bool,
}

/// A single capability violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The device cannot carry this flag.
    Forbidden { device: Device, flag: &'static str },
    /// The device requires this flag.
    Required { device: Device, flag: &'static str },
    /// The device does not build this variant.
    UnsupportedVariant { device: Device, variant: Variant },
}

impl Violation {
    /// Name of the offending flag or option.
    pub fn flag(&self) -> &'static str {
        match self {
            Violation::Forbidden { flag, .. } | Violation::Required { flag, .. } => flag,
            Violation::UnsupportedVariant { .. } => "build",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Forbidden { device, flag } => {
                write!(f, "{} does not support {}", device, flag)
            }
            Violation::Required { device, flag } => {
                write!(f, "{} requires {} to be enabled", device, flag)
            }
            Violation::UnsupportedVariant { device, variant } => {
                write!(f, "{} has no {} build", device, variant)
            }
        }
    }
}

/// Check flags and variant against the device's capability set.
///
/// Returns every violation found, in a stable order (variant, overclock,
/// cpuquiet). An empty list means the combination is legal.
pub fn check_flags(device: Device, variant: Variant, flags: FlagSet) -> Vec<Violation> {
    let profile = profile(device);
    let mut violations = Vec::new();

    if !profile.supports(variant) {
        violations.push(Violation::UnsupportedVariant { device, variant });
    }

    for (flag, rule, enabled) in [
        ("overclock", profile.overclock, flags.overclock),
        ("cpuquiet", profile.cpuquiet, flags.cpuquiet),
    ] {
        if !rule.permits(enabled) {
            violations.push(if enabled {
                Violation::Forbidden { device, flag }
            } else {
                Violation::Required { device, flag }
            });
        }
    }

    violations
}
