/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 *
 * Environment failures carry the PID of the process that observed them so
 * errors raised in a forked child are distinguishable from the parent's.
 */

use super::types::Pid;
use crate::process::types::ProcessStatus;
use miette::Diagnostic;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use thiserror::Error;

/// Process operation result
///
/// # Must Use
/// Process operations can fail and must be handled to prevent leaked children
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Process, controller, queue and lock errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ProcessError {
    #[error("[pid:{pid}] fork() failed: {errno}")]
    #[diagnostic(
        code(process::fork_failed),
        help("The system may be out of process slots or memory.")
    )]
    ForkFailed { pid: Pid, errno: Errno },

    #[error("[pid:{pid}] installing the SIGCHLD handler failed: {errno}")]
    #[diagnostic(code(signals::handler_failed))]
    SignalHandler { pid: Pid, errno: Errno },

    #[error("[pid:{pid}] semaphore {key}: {op}() failed: {errno}")]
    #[diagnostic(
        code(sync::semaphore_failed),
        help("Check SysV IPC limits (ipcs -ls) and stale semaphores (ipcs -s).")
    )]
    Semaphore {
        pid: Pid,
        key: i32,
        op: &'static str,
        errno: Errno,
    },

    #[error("[pid:{pid}] cannot read the executable inode: {reason}")]
    #[diagnostic(code(sync::executable_inode))]
    ExecutableInode { pid: Pid, reason: String },

    #[error("[pid:{pid}] sending {signal} to process {target} failed: {errno}")]
    #[diagnostic(code(process::kill_failed))]
    KillFailed {
        pid: Pid,
        target: Pid,
        signal: Signal,
        errno: Errno,
    },

    #[error("[pid:{pid}] waitpid() failed: {errno}")]
    #[diagnostic(code(process::wait_failed))]
    WaitFailed { pid: Pid, errno: Errno },

    #[error("[pid:{pid}] process {target} is not signalable")]
    #[diagnostic(
        code(process::not_signalable),
        help("The process has already exited or is not a child of this process tree.")
    )]
    NotSignalable { pid: Pid, target: Pid },

    #[error("process is {actual}, expected {expected}")]
    #[diagnostic(
        code(process::invalid_state),
        help("Operation cannot be performed in the current process state.")
    )]
    InvalidState {
        expected: ProcessStatus,
        actual: ProcessStatus,
    },

    #[error("process {target} is still running")]
    #[diagnostic(code(process::still_running))]
    StillRunning { target: Pid },

    #[error("[pid:{pid}] forked() called without a fork (controller owner is {owner})")]
    #[diagnostic(
        code(controller::not_forked),
        help("Only call forked() in a child process, right after fork().")
    )]
    NotForked { pid: Pid, owner: Pid },

    #[error("[pid:{pid}] controller owned by process {owner} used from another process")]
    #[diagnostic(
        code(controller::foreign),
        help("Call forked() in the child and use the controller it returns.")
    )]
    ForeignController { pid: Pid, owner: Pid },

    #[error("[pid:{pid}] {count} active children were reaped outside this controller")]
    #[diagnostic(
        code(queue::lost_children),
        help("Another waitpid() caller in this process reaped children owned by the queue.")
    )]
    LostChildren { pid: Pid, count: usize },
}

impl ProcessError {
    /// Environment failures indicate a corrupted process environment
    #[must_use]
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            Self::ForkFailed { .. }
                | Self::SignalHandler { .. }
                | Self::Semaphore { .. }
                | Self::ExecutableInode { .. }
                | Self::KillFailed { .. }
                | Self::WaitFailed { .. }
        )
    }

    /// Contract errors are programmer errors raised at the call site
    #[must_use]
    pub fn is_contract(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. }
                | Self::StillRunning { .. }
                | Self::NotForked { .. }
                | Self::ForeignController { .. }
        )
    }
}
