//! Device profiles and capability rules for Stormguard kernel builds.
//!
//! Every supported device is described once, in a fixed table: which flags
//! it can carry, which build variants exist for it, and where its artifacts
//! live. Validation is deny-by-default: a flag outside a device's capability
//! set is reported, never silently dropped.

mod kind;
mod rules;
mod table;

pub use kind::{Compiler, Device, ParseKindError, Variant};
pub use rules::{check_flags, is_reserved_label, FlagSet, Violation, RESERVED_LABELS};
pub use table::{profile, DeviceProfile, ModuleLayout, Reversion, Rule, VariantProfile};
