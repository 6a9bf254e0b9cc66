//! Derived paths, names and toolchain locations.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sg_profile::{profile, Compiler, Reversion};

use super::BuildConfig;

/// Archive name prefix.
pub const ARCHIVE_PREFIX: &str = "Stormguard";

/// Kernel image path inside the output tree.
pub const KERNEL_IMAGE: &str = "arch/arm64/boot/Image.gz-dtb";

/// Toolchain locations for a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainPaths {
    /// `CROSS_COMPILE` prefix of the 64-bit gcc toolchain
    pub cross_compile: String,
    /// `CROSS_COMPILE_ARM32` prefix of the 32-bit companion toolchain
    pub cross_compile_arm32: String,
    /// Clang binary, when building with clang
    pub clang: Option<PathBuf>,
    /// Strip tool matching the compiler family
    pub strip: PathBuf,
}

/// Module paths, for variants that ship a kernel module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModulePaths {
    /// Module as produced by the build
    pub built: PathBuf,
    /// Install directory inside the staging tree
    pub install_dir: PathBuf,
    /// Final module path inside the staging tree
    pub installed: PathBuf,
}

/// Everything later stages need to know about where things live.
///
/// Computed once per run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedLayout {
    pub workspace_root: PathBuf,
    pub source_tree: PathBuf,
    pub output_tree: PathBuf,
    pub staging_tree: PathBuf,
    pub archive_dir: PathBuf,
    pub archive_name: String,
    pub archive_path: PathBuf,
    pub kernel_image: PathBuf,
    pub staged_image: PathBuf,
    pub module: Option<ModulePaths>,
    pub defconfig: String,
    pub branch: String,
    /// Version label with the variant suffix, e.g. `r12-MIUI`
    pub version_name: String,
    /// Source reversion to apply before configuring
    pub reversion: Option<Reversion>,
    pub toolchain: ToolchainPaths,
    /// Lock serialising runs against the same source tree
    pub lock_path: PathBuf,
}

impl DerivedLayout {
    /// Whether the source tree gets a hard reset after the build.
    pub fn resets_source_tree(&self) -> bool {
        matches!(self.reversion, Some(Reversion::Commit(_)))
    }
}

/// Derive the layout for a configuration rooted at `workspace_root`.
///
/// Pure function of its inputs.
pub fn derive_layout(config: &BuildConfig, workspace_root: &Path) -> DerivedLayout {
    let device_profile = profile(config.device);
    // resolve() rejects variants the device does not build
    let variant_profile = device_profile.variant(config.variant);

    let device = config.device.as_str();
    let variant = config.variant.as_str();

    let source_tree = workspace_root.join(device);
    let staging_tree = workspace_root.join("anykernel").join(device).join(variant);
    let target = workspace_root.join("build/out/target/kernel");
    let output_tree = target.join(device).join(variant);

    let mut archive_dir = target.join("zip").join(device).join(variant);
    let mut name = ARCHIVE_PREFIX.to_string();
    if config.flags.overclock {
        name.push_str("-OC");
    }
    if config.flags.cpuquiet {
        archive_dir.push("CPUQuiet");
        name.push_str("-CPUQuiet");
    }

    let version_name = match variant_profile.map(|v| v.version_suffix) {
        Some(suffix) if !suffix.is_empty() => format!("{}-{}", config.version_label, suffix),
        _ => config.version_label.clone(),
    };

    let archive_name = format!(
        "{}-{}-{}-{}.zip",
        name,
        device,
        version_name,
        config.timestamp_tag()
    );
    let archive_path = archive_dir.join(&archive_name);

    let module = variant_profile.and_then(|v| v.module).map(|m| {
        let install_dir = staging_tree.join(m.install_dir);
        ModulePaths {
            built: output_tree.join(m.built_path),
            installed: install_dir.join(m.install_name),
            install_dir,
        }
    });

    let reversion = if config.flags.overclock {
        None
    } else {
        variant_profile.and_then(|v| v.revert_unless_overclock)
    };

    DerivedLayout {
        workspace_root: workspace_root.to_path_buf(),
        kernel_image: output_tree.join(KERNEL_IMAGE),
        staged_image: staging_tree.join(image_file_name()),
        toolchain: toolchain_paths(config.compiler, &workspace_root.join("toolchain")),
        lock_path: workspace_root.join("build").join(format!(".{}.lock", device)),
        defconfig: device_profile.defconfig.to_string(),
        branch: variant_profile.map(|v| v.branch).unwrap_or_default().to_string(),
        source_tree,
        output_tree,
        staging_tree,
        archive_dir,
        archive_name,
        archive_path,
        module,
        version_name,
        reversion,
    }
}

fn image_file_name() -> &'static str {
    KERNEL_IMAGE.rsplit('/').next().unwrap_or(KERNEL_IMAGE)
}

fn toolchain_paths(compiler: Compiler, toolchain_root: &Path) -> ToolchainPaths {
    let gcc_bin = toolchain_root.join("google-gcc/bin");
    let gcc32_bin = toolchain_root.join("google-gcc-32/bin");
    let clang_bin = toolchain_root.join("google-clang/bin");

    let (clang, strip) = match compiler {
        Compiler::Clang => (Some(clang_bin.join("clang")), clang_bin.join("llvm-strip")),
        Compiler::Gcc => (None, gcc_bin.join("aarch64-linux-android-strip")),
    };

    ToolchainPaths {
        cross_compile: gcc_bin.join("aarch64-linux-android-").to_string_lossy().to_string(),
        cross_compile_arm32: gcc32_bin
            .join("arm-linux-androideabi-")
            .to_string_lossy()
            .to_string(),
        clang,
        strip,
    }
}
