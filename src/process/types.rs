/*!
 * Process Types
 * Status, events and wait results for forked processes
 */

use crate::core::types::{from_nix, ExitCode, Pid, EXIT_SUCCESS};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a process handle
///
/// Transitions only move forward: `Pending -> Running -> terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Created, not yet forked
    Pending,
    /// Forked and not yet reaped
    Running,
    /// Exited with code 0
    Finished,
    /// Exited with a non-zero code
    Failure,
    /// Terminated by a signal
    Killed,
}

impl ProcessStatus {
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failure | Self::Killed)
    }

    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failure => "failure",
            Self::Killed => "killed",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events observable through listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// Fired in the parent right after a successful fork
    Start,
    /// Fired in the parent once the exit has been reaped
    Exit,
}

impl Event {
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a reaped child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Voluntary exit with a code
    Exited(ExitCode),
    /// Killed by a signal
    Signaled(Signal),
}

impl Termination {
    /// Interpret a raw wait status; `None` for statuses that are not an exit
    #[must_use]
    pub fn from_wait_status(status: WaitStatus) -> Option<(Pid, Self)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((from_nix(pid), Self::Exited(code))),
            WaitStatus::Signaled(pid, signal, _) => Some((from_nix(pid), Self::Signaled(signal))),
            _ => None,
        }
    }

    /// Terminal status this termination maps to
    #[must_use]
    pub const fn status(self) -> ProcessStatus {
        match self {
            Self::Signaled(_) => ProcessStatus::Killed,
            Self::Exited(EXIT_SUCCESS) => ProcessStatus::Finished,
            Self::Exited(_) => ProcessStatus::Failure,
        }
    }

    /// Exit code; a signaled exit reports 0 like WEXITSTATUS does
    #[must_use]
    pub const fn exit_code(self) -> ExitCode {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(_) => 0,
        }
    }

    #[must_use]
    pub const fn signal(self) -> Option<Signal> {
        match self {
            Self::Exited(_) => None,
            Self::Signaled(signal) => Some(signal),
        }
    }
}

/// Which child a blocking wait targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitTarget {
    #[default]
    Any,
    Pid(Pid),
}

/// Result of a single reap attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A registered child was reaped and its handle notified
    Reaped(Pid),
    /// A child was reaped that this controller does not own
    Ignored(Pid),
    /// The wait was interrupted by a signal before any child exited
    Interrupted,
    /// Nothing to wait for
    NoChildren,
}
