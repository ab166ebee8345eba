/*!
 * Core Types
 * Common types used across the crate
 */

use nix::unistd::{getpid, Pid as NixPid};

/// OS process ID type
pub type Pid = u32;

/// Queue priority (higher is admitted first)
pub type Priority = i32;

/// Exit code returned by a workload
pub type ExitCode = i32;

/// Conventional success exit code
pub const EXIT_SUCCESS: ExitCode = 0;

/// Conventional failure exit code
pub const EXIT_FAILURE: ExitCode = 1;

/// PID of the calling process
#[inline]
#[must_use]
pub fn current_pid() -> Pid {
    getpid().as_raw() as Pid
}

/// Convert to the nix representation used at the syscall seam
#[inline]
#[must_use]
pub(crate) fn to_nix(pid: Pid) -> NixPid {
    NixPid::from_raw(pid as i32)
}

/// Convert from the nix representation
#[inline]
#[must_use]
pub(crate) fn from_nix(pid: NixPid) -> Pid {
    pid.as_raw() as Pid
}
