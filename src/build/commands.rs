//! Structured command lines for git, make and the toolchain.

use std::path::Path;

use regex_lite::Regex;
use sg_profile::Compiler;

use crate::config::MakeSettings;
use crate::resolve::{BuildConfig, DerivedLayout};
use crate::runner::CommandSpec;

/// Kernel architecture passed to every make invocation.
pub const ARCH: &str = "arm64";

/// Files or directories in the source tree left behind by a configure pass.
pub const CONFIG_MARKERS: &[&str] = &[".config", "include/config"];

const CLANG_TRIPLE: &str = "aarch64-linux-gnu-";
const CLANG_TRIPLE_ARM32: &str = "arm-linux-gnueabi-";

pub fn checkout(layout: &DerivedLayout) -> CommandSpec {
    git(layout).args(["checkout", layout.branch.as_str()])
}

pub fn revert(layout: &DerivedLayout, commit: &str) -> CommandSpec {
    git(layout).args(["revert", "--no-commit", commit])
}

pub fn reset_hard(layout: &DerivedLayout) -> CommandSpec {
    git(layout).args(["reset", "--hard"])
}

pub fn defconfig(layout: &DerivedLayout) -> CommandSpec {
    make(layout).arg(layout.defconfig.as_str())
}

/// `make mrproper` in the source tree.
pub fn mrproper(layout: &DerivedLayout) -> CommandSpec {
    CommandSpec::new("make")
        .arg("mrproper")
        .current_dir(&layout.source_tree)
}

/// `make mrproper` against the output tree.
pub fn mrproper_output(layout: &DerivedLayout) -> CommandSpec {
    make(layout).arg("mrproper")
}

/// `<clang> --version`; only meaningful for clang builds.
pub fn compiler_version(clang: &Path) -> CommandSpec {
    CommandSpec::new(clang.to_string_lossy()).arg("--version")
}

/// The compile invocation.
///
/// `compiler_string` is the parsed clang version; ignored for gcc.
pub fn compile(
    config: &BuildConfig,
    layout: &DerivedLayout,
    settings: &MakeSettings,
    compiler_string: Option<&str>,
) -> CommandSpec {
    let tc = &layout.toolchain;
    let wrap = |tool: &str| {
        if settings.ccache {
            format!("ccache {tool}")
        } else {
            tool.to_string()
        }
    };

    let mut cmd = make(layout);
    match config.compiler {
        Compiler::Gcc => {
            cmd = cmd
                .arg(format!("CROSS_COMPILE={}", wrap(&tc.cross_compile)))
                .arg(format!("CROSS_COMPILE_ARM32={}", wrap(&tc.cross_compile_arm32)))
                .arg(format!("-j{}", settings.jobs));
        }
        Compiler::Clang => {
            let clang = tc
                .clang
                .as_deref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "clang".to_string());
            cmd = cmd
                .arg(format!("CROSS_COMPILE={}", tc.cross_compile))
                .arg(format!("CROSS_COMPILE_ARM32={}", tc.cross_compile_arm32))
                .arg(format!("-j{}", settings.jobs))
                .arg(format!("CC={}", wrap(&clang)))
                .arg(format!("CLANG_TRIPLE={CLANG_TRIPLE}"))
                .arg(format!("CLANG_TRIPLE_ARM32={CLANG_TRIPLE_ARM32}"))
                .arg(format!(
                    "KBUILD_COMPILER_STRING={}",
                    compiler_string.unwrap_or_default()
                ));
        }
    }
    cmd
}

/// Human-readable compiler string from `clang --version` output.
///
/// Takes the first line, drops parenthesised URLs, squeezes spaces and
/// keeps fields 1 and 6 to 8, e.g. `Android clang version 9.0.3`.
pub fn parse_compiler_string(version_output: &str) -> String {
    let first = version_output.lines().next().unwrap_or_default();
    let urls = Regex::new(r"(?s)\(http.*?\)").expect("static regex");
    let stripped = urls.replace_all(first, "");

    let fields: Vec<&str> = stripped.split_whitespace().collect();
    let mut kept: Vec<&str> = fields.iter().take(1).copied().collect();
    kept.extend(fields.iter().skip(5).take(3));
    kept.join(" ")
}

/// Whether a previous configure pass left a marker in the source tree.
pub fn has_config_marker(source_tree: &Path) -> bool {
    CONFIG_MARKERS.iter().any(|m| source_tree.join(m).exists())
}

fn git(layout: &DerivedLayout) -> CommandSpec {
    CommandSpec::new("git").current_dir(&layout.source_tree)
}

fn make(layout: &DerivedLayout) -> CommandSpec {
    CommandSpec::new("make")
        .arg(format!("ARCH={ARCH}"))
        .arg(format!("O={}", layout.output_tree.display()))
        .current_dir(&layout.source_tree)
}
