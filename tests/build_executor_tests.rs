//! Build state machine against a scripted runner

mod fixtures;

use std::fs;
use std::sync::Arc;

use stormguard_build::build::{BuildError, BuildExecutor, BuildState};
use stormguard_build::config::MakeSettings;
use stormguard_build::mock::ScriptedRunner;
use stormguard_build::resolve::{BuildConfig, DerivedLayout, RawFlags};
use stormguard_build::runner::OutputMode;

use fixtures::{config, raw, Workspace};

const REVERT: &str = "git revert --no-commit 122cc6988b399885ea8918a790c01662a20e8463";
const COMPILE: &str = "CROSS_COMPILE=";

fn make_settings() -> MakeSettings {
    MakeSettings { jobs: 4, ccache: true }
}

fn setup(flags: &RawFlags) -> (Workspace, BuildConfig, DerivedLayout) {
    let ws = Workspace::new();
    let config = config(flags);
    let layout = ws.layout(&config);
    fs::create_dir_all(&layout.source_tree).unwrap();
    (ws, config, layout)
}

fn executor(runner: &Arc<ScriptedRunner>, config: &BuildConfig, layout: &DerivedLayout) -> BuildExecutor {
    BuildExecutor::new(runner.clone(), config.clone(), layout.clone(), make_settings())
}

#[test]
fn test_happy_path_command_sequence() {
    let (_ws, config, layout) = setup(&raw("mido", "miui"));
    let runner = Arc::new(ScriptedRunner::new());

    let mut exec = executor(&runner, &config, &layout);
    let report = exec.run().unwrap();

    assert_eq!(
        report.history,
        vec![
            BuildState::Start,
            BuildState::Checkout,
            BuildState::PatchAdjust,
            BuildState::Configure,
            BuildState::Compile,
            BuildState::Success,
        ]
    );
    assert!(!report.retried);

    let commands = runner.commands();
    assert_eq!(commands.len(), 5, "{commands:#?}");
    assert_eq!(commands[0], "git checkout R/N/MIUI");
    assert_eq!(commands[1], REVERT);
    assert!(commands[2].ends_with("sg_defconfig"));
    assert!(commands[3].contains(COMPILE));
    assert!(commands[3].contains("-j4"));
    assert_eq!(commands[4], "git reset --hard");

    for call in runner.calls() {
        assert_eq!(call.cwd.as_deref(), Some(layout.source_tree.as_path()));
    }
}

#[test]
fn test_compile_failure_without_marker_is_fatal_and_resets() {
    let (_ws, config, layout) = setup(&raw("mido", "miui"));
    let runner = Arc::new(ScriptedRunner::new().fail(COMPILE, 2));

    let mut exec = executor(&runner, &config, &layout);
    let err = exec.run().unwrap_err();

    match &err {
        BuildError::Command { state, source } => {
            assert_eq!(*state, BuildState::Compile);
            assert_eq!(source.exit_code(), 2);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(exec.state(), BuildState::Fatal);
    assert_eq!(exec.history().last(), Some(&BuildState::Fatal));
    assert_eq!(runner.count("mrproper"), 0);
    assert_eq!(runner.count(COMPILE), 1);
    assert_eq!(runner.commands().last().map(String::as_str), Some("git reset --hard"));
}

#[test]
fn test_clean_retry_recovers_once() {
    let (_ws, config, layout) = setup(&raw("mido", "miui"));
    fs::write(layout.source_tree.join(".config"), "CONFIG_ARM64=y\n").unwrap();
    let runner = Arc::new(ScriptedRunner::new().fail_times(COMPILE, 2, 1));

    let mut exec = executor(&runner, &config, &layout);
    let report = exec.run().unwrap();

    assert!(report.retried);
    assert_eq!(runner.count("make mrproper"), 1);
    assert_eq!(runner.count(COMPILE), 2);
    assert_eq!(runner.count("sg_defconfig"), 2);
    assert_eq!(
        report.history,
        vec![
            BuildState::Start,
            BuildState::Checkout,
            BuildState::PatchAdjust,
            BuildState::Configure,
            BuildState::Compile,
            BuildState::CleanRetry,
            BuildState::Configure,
            BuildState::Compile,
            BuildState::Success,
        ]
    );
}

#[test]
fn test_retry_happens_at_most_once() {
    let (_ws, config, layout) = setup(&raw("mido", "miui"));
    fs::create_dir_all(layout.source_tree.join("include/config")).unwrap();
    let runner = Arc::new(ScriptedRunner::new().fail(COMPILE, 2));

    let mut exec = executor(&runner, &config, &layout);
    let err = exec.run().unwrap_err();

    assert!(matches!(err, BuildError::RetryExhausted(_)), "{err:?}");
    assert_eq!(runner.count(COMPILE), 2);
    assert_eq!(runner.count("make mrproper"), 1);
    assert_eq!(exec.history().last(), Some(&BuildState::Fatal));
    assert_eq!(runner.count("git reset --hard"), 1);
}

#[test]
fn test_checkout_failure_is_fatal_without_reset() {
    let (_ws, config, layout) = setup(&raw("mido", "miui"));
    let runner = Arc::new(ScriptedRunner::new().fail("git checkout", 1));

    let mut exec = executor(&runner, &config, &layout);
    let err = exec.run().unwrap_err();

    assert!(matches!(
        err,
        BuildError::Command {
            state: BuildState::Checkout,
            ..
        }
    ));
    assert_eq!(runner.commands(), vec!["git checkout R/N/MIUI"]);
}

#[test]
fn test_revert_failure_is_fatal_and_resets() {
    let (_ws, config, layout) = setup(&raw("mido", "miui"));
    let runner = Arc::new(ScriptedRunner::new().fail("git revert", 1));

    let mut exec = executor(&runner, &config, &layout);
    let err = exec.run().unwrap_err();

    assert!(matches!(
        err,
        BuildError::Command {
            state: BuildState::PatchAdjust,
            ..
        }
    ));
    assert_eq!(runner.count("make"), 0);
    assert_eq!(runner.count("git reset --hard"), 1);
}

#[test]
fn test_no_reversion_without_table_entry() {
    // whyred has no reversion; overclocked mido skips it
    let mut oc = raw("mido", "miui");
    oc.overclock = true;

    for flags in [raw("whyred", "miui"), oc] {
        let (_ws, config, layout) = setup(&flags);
        let runner = Arc::new(ScriptedRunner::new());
        executor(&runner, &config, &layout).run().unwrap();

        assert_eq!(runner.count("git revert"), 0);
        assert_eq!(runner.count("git reset"), 0);
    }
}

#[test]
fn test_pending_reversion_builds_without_revert() {
    let (_ws, config, layout) = setup(&raw("mido", "custom"));
    let runner = Arc::new(ScriptedRunner::new());
    executor(&runner, &config, &layout).run().unwrap();

    assert_eq!(runner.commands()[0], "git checkout R/C/P");
    assert_eq!(runner.count("git revert"), 0);
    assert_eq!(runner.count("git reset"), 0);
}

#[test]
fn test_clang_compiler_string_computed_once() {
    let mut flags = raw("mido", "miui");
    flags.compiler = "clang".to_string();
    let (_ws, config, layout) = setup(&flags);
    fs::write(layout.source_tree.join(".config"), "").unwrap();

    let version = "Android (5484270 based on r353983c) clang version 9.0.3 \
                   (https://android.googlesource.com/toolchain/clang 745b3352) (based on LLVM 9.0.3svn)\n";
    let runner = Arc::new(
        ScriptedRunner::new()
            .succeed_with("--version", version)
            .fail_times(COMPILE, 2, 1),
    );

    executor(&runner, &config, &layout).run().unwrap();

    assert_eq!(runner.count("--version"), 1);
    let compiles: Vec<_> = runner
        .calls()
        .into_iter()
        .filter(|c| c.command.contains(COMPILE))
        .collect();
    assert_eq!(compiles.len(), 2);
    for call in compiles {
        assert!(call
            .args
            .contains(&"KBUILD_COMPILER_STRING=Android clang version 9.0.3".to_string()));
        assert!(call.args.iter().any(|a| a.starts_with("CC=ccache ")));
    }
}

#[test]
fn test_verbose_streams_make_output() {
    let mut flags = raw("whyred", "miui");
    flags.verbose = true;
    let (_ws, config, layout) = setup(&flags);
    let runner = Arc::new(ScriptedRunner::new());
    executor(&runner, &config, &layout).run().unwrap();

    for call in runner.calls() {
        let expected = if call.program == "make" {
            OutputMode::Streamed
        } else {
            OutputMode::Captured
        };
        assert_eq!(call.mode, expected, "{}", call.command);
    }
}

#[test]
fn test_cancelled_compile_does_not_retry() {
    let (_ws, config, layout) = setup(&raw("whyred", "miui"));
    fs::write(layout.source_tree.join(".config"), "").unwrap();
    let runner = Arc::new(ScriptedRunner::new().cancel(COMPILE));

    let err = executor(&runner, &config, &layout).run().unwrap_err();
    assert_eq!(err.command_error().map(|e| e.exit_code()), Some(130));
    assert_eq!(runner.count("mrproper"), 0);
}

#[test]
fn test_clean_targets() {
    let (_ws, config, layout) = setup(&raw("whyred", "miui"));
    fs::create_dir_all(&layout.output_tree).unwrap();
    let runner = Arc::new(ScriptedRunner::new());

    executor(&runner, &config, &layout).clean().unwrap();

    let commands = runner.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0], "make mrproper");
    assert!(commands[1].starts_with("make ARCH=arm64 O="));
    assert!(commands[1].ends_with("mrproper"));
}
