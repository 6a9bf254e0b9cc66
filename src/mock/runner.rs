//! Record-and-replay command runner.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::runner::{CommandError, CommandResult, CommandRunner, CommandSpec, OutputMode};

type Effect = Box<dyn Fn(&CommandSpec) + Send + Sync>;

enum Reply {
    Succeed { stdout: String },
    Fail { code: Option<i32>, stderr: String },
    Cancel,
}

struct Rule {
    /// Substring of the displayed command line
    pattern: String,
    reply: Reply,
    /// Remaining uses; None = unlimited
    remaining: Option<usize>,
    effect: Option<Effect>,
}

/// One invocation seen by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env_keys: Vec<String>,
    pub mode: OutputMode,
}

/// Runner that replies from a script and records every call.
///
/// Rules are matched in insertion order against the displayed command
/// line; the first rule with uses left wins. Unmatched commands succeed
/// with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, pattern: &str, reply: Reply, remaining: Option<usize>, effect: Option<Effect>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                reply,
                remaining,
                effect,
            });
        }
        self
    }

    /// Matching commands succeed with `stdout`.
    pub fn succeed_with(self, pattern: &str, stdout: &str) -> Self {
        let reply = Reply::Succeed {
            stdout: stdout.to_string(),
        };
        self.push(pattern, reply, None, None)
    }

    /// Matching commands always fail with `code`.
    pub fn fail(self, pattern: &str, code: i32) -> Self {
        self.fail_times(pattern, code, usize::MAX)
    }

    /// Matching commands fail with `code` for the next `times` calls.
    pub fn fail_times(self, pattern: &str, code: i32, times: usize) -> Self {
        let reply = Reply::Fail {
            code: Some(code),
            stderr: format!("scripted failure ({code})"),
        };
        let remaining = (times != usize::MAX).then_some(times);
        self.push(pattern, reply, remaining, None)
    }

    /// Matching commands report cancellation.
    pub fn cancel(self, pattern: &str) -> Self {
        self.push(pattern, Reply::Cancel, None, None)
    }

    /// Matching commands succeed after running `effect`, e.g. to create
    /// the files a real tool would leave behind.
    pub fn on_run(self, pattern: &str, effect: impl Fn(&CommandSpec) + Send + Sync + 'static) -> Self {
        let reply = Reply::Succeed { stdout: String::new() };
        self.push(pattern, reply, None, Some(Box::new(effect)))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Displayed command lines, in call order.
    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    /// Number of calls whose command line contains `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.command.contains(pattern)).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec, mode: OutputMode) -> Result<CommandResult, CommandError> {
        let command = spec.display();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                command: command.clone(),
                program: spec.program().to_string(),
                args: spec.get_args().to_vec(),
                cwd: spec.cwd().map(|p| p.to_path_buf()),
                env_keys: spec.env_vars().iter().map(|(k, _)| k.clone()).collect(),
                mode,
            });
        }

        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(rule) = rules
            .iter_mut()
            .find(|r| command.contains(&r.pattern) && r.remaining != Some(0))
        else {
            return Ok(CommandResult::default());
        };
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        if let Some(effect) = &rule.effect {
            effect(spec);
        }

        let captured = mode == OutputMode::Captured;
        match &rule.reply {
            Reply::Succeed { stdout } => Ok(CommandResult {
                status: 0,
                stdout: if captured { stdout.clone() } else { String::new() },
                stderr: String::new(),
            }),
            Reply::Fail { code, stderr } => Err(CommandError::Failed {
                command,
                code: *code,
                stdout: captured.then(String::new),
                stderr: captured.then(|| stderr.clone()),
            }),
            Reply::Cancel => Err(CommandError::Cancelled { command }),
        }
    }
}
