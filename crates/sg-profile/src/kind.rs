//! Enumerations of devices, build variants and compilers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a device, variant or compiler name is unknown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct ParseKindError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Supported hardware targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Redmi Note 4X (MSM8953)
    Mido,
    /// Redmi Note 5 Pro (SDM636)
    Whyred,
}

impl Device {
    pub const ALL: [Device; 2] = [Device::Mido, Device::Whyred];

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Mido => "mido",
            Device::Whyred => "whyred",
        }
    }
}

/// Source configuration family that gets compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Aligned with the vendor ROM
    Miui,
    /// Community / custom ROMs
    Custom,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Miui, Variant::Custom];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Miui => "miui",
            Variant::Custom => "custom",
        }
    }
}

/// Supported compiler toolchains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compiler {
    Clang,
    Gcc,
}

impl Compiler {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compiler::Clang => "clang",
            Compiler::Gcc => "gcc",
        }
    }
}

macro_rules! impl_kind_text {
    ($ty:ty, $kind:literal, $expected:literal, [$($name:literal => $value:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = ParseKindError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($value),)+
                    _ => Err(ParseKindError {
                        kind: $kind,
                        value: s.to_string(),
                        expected: $expected,
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_kind_text!(Device, "device", "mido, whyred", ["mido" => Device::Mido, "whyred" => Device::Whyred]);
impl_kind_text!(Variant, "build variant", "miui, custom", ["miui" => Variant::Miui, "custom" => Variant::Custom]);
impl_kind_text!(Compiler, "compiler", "clang, gcc", ["clang" => Compiler::Clang, "gcc" => Compiler::Gcc]);
