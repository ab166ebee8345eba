/*!
 * SIGCHLD Bridge
 *
 * The handler runs in signal context, so it only records that a child changed
 * state. Reaping happens later in ordinary control flow when a controller
 * drains the mark (see `Controller::dispatch`).
 */

use crate::core::errors::{ProcessError, ProcessResult};
use crate::core::types::current_pid;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use parking_lot::{const_mutex, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

static PENDING: AtomicBool = AtomicBool::new(false);
static INSTALLED: AtomicBool = AtomicBool::new(false);
static INSTALL_GUARD: Mutex<()> = const_mutex(());

extern "C" fn on_child_signal(_: libc::c_int) {
    // Only an async-signal-safe atomic store in here
    PENDING.store(true, Ordering::SeqCst);
}

/// Install the SIGCHLD handler once per process image
pub fn install() -> ProcessResult<()> {
    if INSTALLED.load(Ordering::Acquire) {
        return Ok(());
    }

    let _guard = INSTALL_GUARD.lock();
    if INSTALLED.load(Ordering::Acquire) {
        return Ok(());
    }

    let action = SigAction::new(
        SigHandler::Handler(on_child_signal),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );

    // SAFETY: the handler only touches atomics, which is async-signal-safe
    unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(|errno| {
        ProcessError::SignalHandler {
            pid: current_pid(),
            errno,
        }
    })?;

    INSTALLED.store(true, Ordering::Release);
    debug!("SIGCHLD handler installed");
    Ok(())
}

/// Whether the handler is installed in this process image
#[inline]
#[must_use]
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Acquire)
}

/// Consume the "reap pending" mark
#[inline]
pub fn take_pending() -> bool {
    PENDING.swap(false, Ordering::AcqRel)
}

/// Whether a reap is pending, without consuming the mark
#[inline]
#[must_use]
pub fn is_pending() -> bool {
    PENDING.load(Ordering::Acquire)
}

/// Mark a reap as pending from ordinary code
#[inline]
pub fn notify() {
    PENDING.store(true, Ordering::Release);
}

/// Drop a mark inherited from the parent across fork()
#[inline]
pub fn reset() {
    PENDING.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        install().unwrap();
        install().unwrap();
        assert!(is_installed());
    }

    #[test]
    fn test_pending_mark_roundtrip() {
        notify();
        assert!(is_pending());
        assert!(take_pending());
        assert!(!is_pending());
        assert!(!take_pending());
    }
}
