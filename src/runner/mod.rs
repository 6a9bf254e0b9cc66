//! External command execution.
//!
//! Every git, make, toolchain, signer and upload invocation goes through
//! [`CommandRunner`] so builds can be driven by a scripted runner in tests.

mod tree;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::signal::{SignalState, EXIT_CODE_CANCELLED};

pub use tree::{descendants, signal_process, terminate_tree, TermSignal};

const MASK: &str = "****";

/// A program invocation: argv, working directory and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    /// Indexes into `args` that must never be displayed.
    secret: Vec<usize>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append an argument that is masked in logs and error reports.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Extra environment variable. Values are never displayed.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Command line with secret arguments masked.
    pub fn display(&self) -> String {
        let mut line = quote(&self.program);
        for (i, arg) in self.args.iter().enumerate() {
            line.push(' ');
            if self.secret.contains(&i) {
                line.push_str(MASK);
            } else {
                line.push_str(&quote(arg));
            }
        }
        line
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

fn quote(s: &str) -> String {
    if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("{s:?}")
    } else {
        s.to_string()
    }
}

/// How a command's output is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// stdout/stderr collected and returned
    Captured,
    /// stdout/stderr passed through to the terminal
    Streamed,
}

/// Outcome of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub status: i32,
    /// Empty when streamed
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed ({})", describe_code(*.code))]
    Failed {
        command: String,
        /// None when killed by a signal
        code: Option<i32>,
        stdout: Option<String>,
        stderr: Option<String>,
    },

    #[error("`{command}` cancelled")]
    Cancelled { command: String },
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "terminated by signal".to_string(),
    }
}

impl CommandError {
    /// Process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Spawn { .. } => 127,
            CommandError::Failed { code: Some(c), .. } if *c != 0 => *c,
            CommandError::Failed { .. } => 1,
            CommandError::Cancelled { .. } => EXIT_CODE_CANCELLED,
        }
    }

    pub fn command(&self) -> &str {
        match self {
            CommandError::Spawn { command, .. }
            | CommandError::Failed { command, .. }
            | CommandError::Cancelled { command } => command,
        }
    }

    /// Human-readable report including captured output, if any.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        if let CommandError::Failed { stdout, stderr, .. } = self {
            for (label, text) in [("stdout", stdout), ("stderr", stderr)] {
                if let Some(text) = text.as_deref().map(str::trim_end) {
                    if !text.is_empty() {
                        out.push_str(&format!("\n--- {label} ---\n{text}"));
                    }
                }
            }
        }
        out
    }
}

/// Runs external commands.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &CommandSpec, mode: OutputMode) -> Result<CommandResult, CommandError>;

    fn capture(&self, command: &CommandSpec) -> Result<CommandResult, CommandError> {
        self.run(command, OutputMode::Captured)
    }

    fn stream(&self, command: &CommandSpec) -> Result<CommandResult, CommandError> {
        self.run(command, OutputMode::Streamed)
    }
}

/// Runs commands as real child processes.
///
/// Each child's pid is registered with the signal state while it runs so
/// an interrupt can terminate its whole tree.
pub struct SystemRunner {
    signals: Arc<SignalState>,
}

impl SystemRunner {
    pub fn new(signals: Arc<SignalState>) -> Self {
        Self { signals }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, mode: OutputMode) -> Result<CommandResult, CommandError> {
        let command = spec.display();
        if self.signals.is_cancel_requested() {
            return Err(CommandError::Cancelled { command });
        }
        debug!(%command, ?mode, "running");

        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null());
        match mode {
            OutputMode::Captured => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::Streamed => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        let child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;
        let pid = child.id();
        self.signals.register_pid(pid);
        let waited = child.wait_with_output();
        self.signals.unregister_pid(pid);

        let output = waited.map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

        if self.signals.is_cancel_requested() {
            return Err(CommandError::Cancelled { command });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            return Ok(CommandResult {
                status: 0,
                stdout,
                stderr,
            });
        }

        let captured = mode == OutputMode::Captured;
        Err(CommandError::Failed {
            command,
            code: output.status.code(),
            stdout: captured.then_some(stdout),
            stderr: captured.then_some(stderr),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_masks_secrets() {
        let spec = CommandSpec::new("curl")
            .arg("--user")
            .secret_arg("stormguard:hunter2")
            .arg("-T")
            .arg("/tmp/my file.zip");
        let shown = spec.display();
        assert_eq!(shown, "curl --user **** -T \"/tmp/my file.zip\"");
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_env_values_not_displayed() {
        let spec = CommandSpec::new("jarsigner").env("SG_KEYSTORE_PASS", "secret");
        assert!(!spec.display().contains("secret"));
        assert_eq!(spec.env_vars()[0].0, "SG_KEYSTORE_PASS");
    }

    #[test]
    fn test_exit_codes() {
        let failed = CommandError::Failed {
            command: "make".into(),
            code: Some(2),
            stdout: None,
            stderr: None,
        };
        assert_eq!(failed.exit_code(), 2);

        let killed = CommandError::Failed {
            command: "make".into(),
            code: None,
            stdout: None,
            stderr: None,
        };
        assert_eq!(killed.exit_code(), 1);
        assert!(killed.to_string().contains("terminated by signal"));

        let cancelled = CommandError::Cancelled {
            command: "make".into(),
        };
        assert_eq!(cancelled.exit_code(), 130);
    }

    #[test]
    fn test_report_includes_output() {
        let err = CommandError::Failed {
            command: "git checkout R".into(),
            code: Some(1),
            stdout: Some(String::new()),
            stderr: Some("error: pathspec 'R' did not match\n".into()),
        };
        let report = err.report();
        assert!(report.contains("--- stderr ---"));
        assert!(report.contains("pathspec"));
        assert!(!report.contains("--- stdout ---"));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let runner = SystemRunner::new(Arc::new(SignalState::new()));
        let result = runner
            .capture(&CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2"]))
            .unwrap();
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_failure_code() {
        let runner = SystemRunner::new(Arc::new(SignalState::new()));
        let err = runner
            .capture(&CommandSpec::new("sh").args(["-c", "echo bad >&2; exit 3"]))
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
        match err {
            CommandError::Failed { stderr, .. } => assert_eq!(stderr.as_deref(), Some("bad\n")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_system_runner_spawn_error() {
        let runner = SystemRunner::new(Arc::new(SignalState::new()));
        let err = runner
            .capture(&CommandSpec::new("definitely-not-a-real-program-sg"))
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[test]
    fn test_system_runner_refuses_after_cancel() {
        let signals = Arc::new(SignalState::new());
        signals.request_cancel();
        let runner = SystemRunner::new(signals);
        let err = runner.capture(&CommandSpec::new("true")).unwrap_err();
        assert!(matches!(err, CommandError::Cancelled { .. }));
    }
}
