//! The fixed device profile table.
//!
//! Path shapes and capability rules are data. Nothing outside this table
//! should branch on device identity.

use serde::Serialize;

use crate::kind::{Device, Variant};

/// How a device treats an optional feature flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// The flag may be on or off.
    Allowed,
    /// The flag must be off.
    Forbidden,
    /// The flag must be on.
    Mandatory,
}

impl Rule {
    pub fn permits(&self, enabled: bool) -> bool {
        match self {
            Rule::Allowed => true,
            Rule::Forbidden => !enabled,
            Rule::Mandatory => enabled,
        }
    }
}

/// Source reversion applied before configuring when overclock is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reversion {
    /// Revert this commit without committing.
    Commit(&'static str),
    /// The variant needs a reversion that has not been rebased yet.
    Pending,
}

impl Reversion {
    pub fn commit(&self) -> Option<&'static str> {
        match self {
            Reversion::Commit(id) => Some(id),
            Reversion::Pending => None,
        }
    }
}

/// Where a shipped kernel module is built and where it lands in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleLayout {
    /// Module path relative to the output tree.
    pub built_path: &'static str,
    /// Install directory relative to the staging tree.
    pub install_dir: &'static str,
    /// File name inside `install_dir`.
    pub install_name: &'static str,
}

/// Per-variant data of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantProfile {
    pub variant: Variant,
    /// Branch checked out in the source tree.
    pub branch: &'static str,
    /// Appended to the version label in artifact names.
    pub version_suffix: &'static str,
    /// Module shipped with the kernel image, if any.
    pub module: Option<ModuleLayout>,
    /// Reversion applied when overclock is disabled, if any.
    pub revert_unless_overclock: Option<Reversion>,
}

/// Everything known about one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub device: Device,
    pub defconfig: &'static str,
    pub overclock: Rule,
    pub cpuquiet: Rule,
    pub variants: &'static [VariantProfile],
}

impl DeviceProfile {
    /// Look up a variant; `None` when the device does not build it.
    pub fn variant(&self, variant: Variant) -> Option<&VariantProfile> {
        self.variants.iter().find(|v| v.variant == variant)
    }

    pub fn supports(&self, variant: Variant) -> bool {
        self.variant(variant).is_some()
    }
}

const PRONTO_WLAN: ModuleLayout = ModuleLayout {
    built_path: "drivers/staging/prima/wlan.ko",
    install_dir: "modules/system/lib/modules/pronto",
    install_name: "pronto_wlan.ko",
};

const QCA_CLD3_WLAN: ModuleLayout = ModuleLayout {
    built_path: "drivers/staging/qcacld-3.0/wlan.ko",
    install_dir: "modules/vendor/lib/modules/qca_cld3",
    install_name: "qca_cld3_wlan.ko",
};

static MIDO: DeviceProfile = DeviceProfile {
    device: Device::Mido,
    defconfig: "sg_defconfig",
    overclock: Rule::Allowed,
    cpuquiet: Rule::Mandatory,
    variants: &[
        VariantProfile {
            variant: Variant::Miui,
            branch: "R/N/MIUI",
            version_suffix: "MIUI",
            module: Some(PRONTO_WLAN),
            revert_unless_overclock: Some(Reversion::Commit(
                "122cc6988b399885ea8918a790c01662a20e8463",
            )),
        },
        VariantProfile {
            variant: Variant::Custom,
            branch: "R/C/P",
            version_suffix: "CUSTOM",
            module: None,
            // TODO: rebase the overclock reversion onto the custom (Pie) branch
            revert_unless_overclock: Some(Reversion::Pending),
        },
    ],
};

static WHYRED: DeviceProfile = DeviceProfile {
    device: Device::Whyred,
    defconfig: "whyred_defconfig",
    overclock: Rule::Forbidden,
    cpuquiet: Rule::Forbidden,
    variants: &[VariantProfile {
        variant: Variant::Miui,
        branch: "R/O/MIUI",
        version_suffix: "MIUI",
        module: Some(QCA_CLD3_WLAN),
        revert_unless_overclock: None,
    }],
};

/// Profile of a device.
pub fn profile(device: Device) -> &'static DeviceProfile {
    match device {
        Device::Mido => &MIDO,
        Device::Whyred => &WHYRED,
    }
}
