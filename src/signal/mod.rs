//! Signal handling for cancellation (SIGINT/SIGTERM)
//!
//! On the first signal:
//! 1. Mark the run cancelled so no further command is started
//! 2. Terminate the process tree of every running external command
//!
//! On a second signal: kill what is left and exit immediately with 130.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::runner::{terminate_tree, TermSignal};

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 130;

/// Shared cancellation state
#[derive(Debug, Default)]
pub struct SignalState {
    /// First signal received
    cancel_requested: AtomicBool,
    /// Second signal received
    immediate_exit: AtomicBool,
    signal_count: AtomicU8,
    /// Pids of external commands currently running
    running_pids: Mutex<Vec<u32>>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record a signal and decide what to do about it.
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        match count {
            0 => {
                self.cancel_requested.store(true, Ordering::SeqCst);
                SignalAction::InitiateCancellation
            }
            1 => {
                self.immediate_exit.store(true, Ordering::SeqCst);
                SignalAction::ImmediateExit
            }
            _ => SignalAction::Ignore,
        }
    }

    /// Request cancellation without a signal (operator API, tests).
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn register_pid(&self, pid: u32) {
        if let Ok(mut pids) = self.running_pids.lock() {
            pids.push(pid);
        }
    }

    pub fn unregister_pid(&self, pid: u32) {
        if let Ok(mut pids) = self.running_pids.lock() {
            pids.retain(|p| *p != pid);
        }
    }

    pub fn running_pids(&self) -> Vec<u32> {
        self.running_pids.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Terminate every registered command together with its descendants.
    ///
    /// Returns the number of processes signalled.
    pub fn terminate_running(&self, signal: TermSignal) -> usize {
        let mut signalled = 0;
        for pid in self.running_pids() {
            signalled += terminate_tree(pid, signal);
            signalled += crate::runner::signal_process(pid, signal);
        }
        signalled
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    InitiateCancellation,
    ImmediateExit,
    Ignore,
}

/// Installs the process-wide handler around a shared state.
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    pub fn with_state(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install handlers for SIGINT and SIGTERM. Call once at startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                warn!("interrupt received, terminating running build commands");
                let count = state.terminate_running(TermSignal::Term);
                warn!(processes = count, "termination signal sent");
            }
            SignalAction::ImmediateExit => {
                warn!("second interrupt received, exiting immediately");
                state.terminate_running(TermSignal::Kill);
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
