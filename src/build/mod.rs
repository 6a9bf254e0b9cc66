//! Build executor
//!
//! States: Start → Checkout → PatchAdjust → Configure → Compile → Success,
//! with a single Compile → CleanRetry → Configure → Compile recovery and
//! Fatal as the failure state.
//!
//! A source tree that had a reversion applied is hard reset on every
//! terminal outcome.

pub mod commands;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use sg_profile::{Compiler, Reversion};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MakeSettings;
use crate::resolve::{BuildConfig, DerivedLayout};
use crate::runner::{CommandError, CommandRunner, CommandSpec, OutputMode};

/// Build state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Start,
    Checkout,
    PatchAdjust,
    Configure,
    Compile,
    CleanRetry,
    Success,
    Fatal,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildState::Success | BuildState::Fatal)
    }

    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: BuildState) -> bool {
        use BuildState::*;
        match (self, target) {
            (Start, Checkout) => true,
            (Checkout, PatchAdjust) => true,
            (PatchAdjust, Configure) => true,
            (Configure, Compile) => true,
            (Compile, Success) => true,
            (Compile, CleanRetry) => true,
            (CleanRetry, Configure) => true,
            (s, Fatal) => !s.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build failed during {state:?}: {source}")]
    Command {
        state: BuildState,
        #[source]
        source: CommandError,
    },

    #[error("compile failed again after clean retry: {0}")]
    RetryExhausted(#[source] CommandError),

    #[error("invalid build transition {from:?} -> {to:?}")]
    InvalidTransition { from: BuildState, to: BuildState },
}

impl BuildError {
    /// Underlying command failure, if any.
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            BuildError::Command { source, .. } | BuildError::RetryExhausted(source) => Some(source),
            BuildError::InvalidTransition { .. } => None,
        }
    }
}

/// What a finished build looked like.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Every state entered, in order
    pub history: Vec<BuildState>,
    pub retried: bool,
    /// `KBUILD_COMPILER_STRING` used for clang builds
    pub compiler_string: Option<String>,
    #[serde(skip)]
    pub duration: Duration,
}

/// Drives one build through the state machine.
pub struct BuildExecutor {
    runner: Arc<dyn CommandRunner>,
    config: BuildConfig,
    layout: DerivedLayout,
    make: MakeSettings,
    state: BuildState,
    history: Vec<BuildState>,
    retried: bool,
    compiler_string: Option<String>,
}

impl BuildExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: BuildConfig,
        layout: DerivedLayout,
        make: MakeSettings,
    ) -> Self {
        Self {
            runner,
            config,
            layout,
            make,
            state: BuildState::Start,
            history: vec![BuildState::Start],
            retried: false,
            compiler_string: None,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn history(&self) -> &[BuildState] {
        &self.history
    }

    /// Run to a terminal state.
    ///
    /// On the error path the report is still available from [`history`](Self::history).
    pub fn run(&mut self) -> Result<BuildReport, BuildError> {
        let started = Instant::now();

        let outcome = loop {
            match self.step() {
                Ok(next) => {
                    if let Err(e) = self.transition(next) {
                        break Err(e);
                    }
                    if next == BuildState::Success {
                        break Ok(());
                    }
                }
                Err(e) => {
                    self.state = BuildState::Fatal;
                    self.history.push(BuildState::Fatal);
                    break Err(e);
                }
            }
        };

        self.reset_source_tree();

        let duration = started.elapsed();
        match &outcome {
            Ok(()) => info!(elapsed = ?duration, retried = self.retried, "build succeeded"),
            Err(e) => warn!(elapsed = ?duration, error = %e, "build failed"),
        }

        outcome.map(|()| BuildReport {
            history: self.history.clone(),
            retried: self.retried,
            compiler_string: self.compiler_string.clone(),
            duration,
        })
    }

    /// Run only the clean targets, for `--clean`.
    pub fn clean(&self) -> Result<(), BuildError> {
        info!(source = %self.layout.source_tree.display(), "cleaning source tree");
        self.make_step(&commands::mrproper(&self.layout), BuildState::Start)?;
        if self.layout.output_tree.exists() {
            info!(output = %self.layout.output_tree.display(), "cleaning output tree");
            self.make_step(&commands::mrproper_output(&self.layout), BuildState::Start)?;
        }
        Ok(())
    }

    fn transition(&mut self, next: BuildState) -> Result<(), BuildError> {
        if !self.state.can_transition_to(next) {
            return Err(BuildError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = ?self.state, to = ?next, "build transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Do the work of the current state and return the next one.
    fn step(&mut self) -> Result<BuildState, BuildError> {
        match self.state {
            BuildState::Start => Ok(BuildState::Checkout),
            BuildState::Checkout => {
                info!(branch = %self.layout.branch, "checking out");
                self.git_step(&commands::checkout(&self.layout))?;
                Ok(BuildState::PatchAdjust)
            }
            BuildState::PatchAdjust => {
                match self.layout.reversion {
                    Some(Reversion::Commit(id)) => {
                        info!(commit = id, "reverting without commit");
                        self.git_step(&commands::revert(&self.layout, id))?;
                    }
                    Some(Reversion::Pending) => {
                        warn!(variant = %self.config.variant, "no reversion recorded for this variant, building as is");
                    }
                    None => {}
                }
                Ok(BuildState::Configure)
            }
            BuildState::Configure => {
                info!(defconfig = %self.layout.defconfig, "configuring");
                self.make_step(&commands::defconfig(&self.layout), BuildState::Configure)?;
                Ok(BuildState::Compile)
            }
            BuildState::Compile => self.compile(),
            BuildState::CleanRetry => {
                self.retried = true;
                warn!("compile failed with a stale configuration, running full clean and retrying once");
                self.make_step(&commands::mrproper(&self.layout), BuildState::CleanRetry)?;
                Ok(BuildState::Configure)
            }
            BuildState::Success | BuildState::Fatal => Ok(self.state),
        }
    }

    fn compile(&mut self) -> Result<BuildState, BuildError> {
        let compiler_string = self.compiler_string()?;
        let cmd = commands::compile(&self.config, &self.layout, &self.make, compiler_string.as_deref());
        info!(compiler = %self.config.compiler, jobs = self.make.jobs, "compiling");

        match self.runner.run(&cmd, self.make_mode()) {
            Ok(_) => Ok(BuildState::Success),
            Err(e @ CommandError::Cancelled { .. }) => Err(BuildError::Command {
                state: BuildState::Compile,
                source: e,
            }),
            Err(e) if self.retried => Err(BuildError::RetryExhausted(e)),
            Err(e) => {
                if commands::has_config_marker(&self.layout.source_tree) {
                    debug!(error = %e, "compile failed, config marker present");
                    Ok(BuildState::CleanRetry)
                } else {
                    Err(BuildError::Command {
                        state: BuildState::Compile,
                        source: e,
                    })
                }
            }
        }
    }

    /// Parsed clang version, computed once per run.
    fn compiler_string(&mut self) -> Result<Option<String>, BuildError> {
        if self.config.compiler != Compiler::Clang {
            return Ok(None);
        }
        if self.compiler_string.is_none() {
            let clang = self.layout.toolchain.clang.clone().unwrap_or_else(|| "clang".into());
            let output = self
                .runner
                .capture(&commands::compiler_version(&clang))
                .map_err(|source| BuildError::Command {
                    state: BuildState::Compile,
                    source,
                })?;
            let parsed = commands::parse_compiler_string(&output.stdout);
            debug!(compiler = %parsed, "compiler string");
            self.compiler_string = Some(parsed);
        }
        Ok(self.compiler_string.clone())
    }

    fn git_step(&self, cmd: &CommandSpec) -> Result<(), BuildError> {
        self.runner
            .capture(cmd)
            .map(|_| ())
            .map_err(|source| BuildError::Command {
                state: self.state,
                source,
            })
    }

    fn make_step(&self, cmd: &CommandSpec, state: BuildState) -> Result<(), BuildError> {
        self.runner
            .run(cmd, self.make_mode())
            .map(|_| ())
            .map_err(|source| BuildError::Command { state, source })
    }

    fn make_mode(&self) -> OutputMode {
        if self.config.flags.verbose {
            OutputMode::Streamed
        } else {
            OutputMode::Captured
        }
    }

    /// Discard an applied reversion so the tree is left clean.
    fn reset_source_tree(&self) {
        if !self.layout.resets_source_tree() || !self.history.contains(&BuildState::PatchAdjust) {
            return;
        }
        info!(source = %self.layout.source_tree.display(), "resetting source tree");
        if let Err(e) = self.runner.capture(&commands::reset_hard(&self.layout)) {
            warn!(error = %e, "failed to reset source tree");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use BuildState::*;
        assert!(Start.can_transition_to(Checkout));
        assert!(Compile.can_transition_to(CleanRetry));
        assert!(CleanRetry.can_transition_to(Configure));
        assert!(Configure.can_transition_to(Fatal));
        assert!(!Success.can_transition_to(Fatal));
        assert!(!Checkout.can_transition_to(Compile));
        assert!(!CleanRetry.can_transition_to(Compile));
    }

    #[test]
    fn test_terminal_states() {
        assert!(BuildState::Success.is_terminal());
        assert!(BuildState::Fatal.is_terminal());
        assert!(!BuildState::CleanRetry.is_terminal());
    }
}
