/*!
 * Child Registry
 * Process-wide table of running children, shared by every controller
 *
 * waitpid(-1) reaps any child of the calling process, whichever controller
 * issued it. Entries therefore live in one table per process image and
 * remember the controller that registered them; a reaped pid is routed to its
 * handle no matter who waited.
 *
 * The first registration also installs an atexit hook that blocks until every
 * registered child has been reaped, so returning from `main` never leaves
 * children behind.
 */

use super::handle::WeakHandle;
use super::types::{Termination, WaitOutcome};
use crate::core::errors::{ProcessError, ProcessResult};
use crate::core::types::{current_pid, Pid};
use ahash::AHashMap;
use nix::errno::Errno;
use nix::sys::wait::waitpid;
use parking_lot::{const_mutex, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

struct Registration {
    controller: u64,
    handle: WeakHandle,
}

struct ChildTable {
    owner: Pid,
    entries: AHashMap<Pid, Registration>,
}

static TABLE: Mutex<Option<ChildTable>> = const_mutex(None);
static EXIT_HOOK: AtomicBool = AtomicBool::new(false);

/// Run `f` on this process image's entries; an inherited table is discarded
fn with_table<R>(f: impl FnOnce(&mut AHashMap<Pid, Registration>) -> R) -> R {
    let pid = current_pid();
    let mut slot = TABLE.lock();
    if slot.as_ref().is_some_and(|table| table.owner != pid) {
        *slot = None;
    }
    let table = slot.get_or_insert_with(|| ChildTable {
        owner: pid,
        entries: AHashMap::new(),
    });
    f(&mut table.entries)
}

pub(crate) fn insert(pid: Pid, controller: u64, handle: WeakHandle) {
    with_table(|entries| entries.insert(pid, Registration { controller, handle }));
    install_exit_hook();
}

/// Whether `pid` is registered by `controller`
pub(crate) fn contains(pid: Pid, controller: u64) -> bool {
    with_table(|entries| {
        entries
            .get(&pid)
            .is_some_and(|entry| entry.controller == controller)
    })
}

/// Registered pids, of one controller or of the whole process
pub(crate) fn pids(controller: Option<u64>) -> Vec<Pid> {
    with_table(|entries| {
        entries
            .iter()
            .filter(|(_, entry)| controller.map_or(true, |id| entry.controller == id))
            .map(|(pid, _)| *pid)
            .collect()
    })
}

pub(crate) fn count(controller: u64) -> usize {
    with_table(|entries| {
        entries
            .values()
            .filter(|entry| entry.controller == controller)
            .count()
    })
}

/// Drop a registration whose child can no longer be reaped
///
/// Returns the controller it belonged to.
pub(crate) fn forget(pid: Pid) -> Option<u64> {
    with_table(|entries| entries.remove(&pid)).map(|entry| entry.controller)
}

/// Drop every registration; used once the OS reports no children at all
///
/// Returns how many of them belonged to `controller`.
pub(crate) fn forget_all(controller: u64) -> usize {
    with_table(|entries| {
        let owned = entries
            .values()
            .filter(|entry| entry.controller == controller)
            .count();
        if !entries.is_empty() {
            warn!(count = entries.len(), "Registered children were reaped elsewhere");
        }
        entries.clear();
        owned
    })
}

/// Discard the parent's table in a freshly forked child
pub(crate) fn reset_after_fork() {
    // try_lock: another parent thread may have held it across fork()
    if let Some(mut slot) = TABLE.try_lock() {
        if slot.as_ref().is_some_and(|table| table.owner != current_pid()) {
            *slot = None;
        }
    }
}

/// Hand a reaped exit to its handle
///
/// The entry is removed before notifying, so listeners may register new
/// children.
pub(crate) fn route(pid: Pid, termination: Termination) -> ProcessResult<WaitOutcome> {
    if pid == 0 {
        return Ok(WaitOutcome::Ignored(pid));
    }

    let entry = with_table(|entries| entries.remove(&pid));
    let Some(handle) = entry.and_then(|entry| entry.handle.upgrade()) else {
        debug!(pid, "Ignoring exit of unknown process");
        return Ok(WaitOutcome::Ignored(pid));
    };

    handle.exited(termination)?;
    Ok(WaitOutcome::Reaped(pid))
}

/// Block until no registered child is left in this process image
pub(crate) fn reap_remaining() -> ProcessResult<usize> {
    let mut reaped = 0;
    while !pids(None).is_empty() {
        match waitpid(None::<nix::unistd::Pid>, None) {
            Ok(status) => {
                if let Some((pid, termination)) = Termination::from_wait_status(status) {
                    if let WaitOutcome::Reaped(_) = route(pid, termination)? {
                        reaped += 1;
                    }
                }
            }
            Err(Errno::EINTR) => {}
            Err(Errno::ECHILD) => {
                with_table(|entries| entries.clear());
                break;
            }
            Err(errno) => {
                return Err(ProcessError::WaitFailed {
                    pid: current_pid(),
                    errno,
                })
            }
        }
    }
    Ok(reaped)
}

fn install_exit_hook() {
    // Inherited across fork() together with the atexit registration itself
    if EXIT_HOOK.swap(true, Ordering::AcqRel) {
        return;
    }

    // SAFETY: reap_at_exit is a plain extern "C" fn without arguments
    if unsafe { libc::atexit(reap_at_exit) } != 0 {
        EXIT_HOOK.store(false, Ordering::Release);
        warn!("Failed to install the exit hook; children may outlive the process");
    }
}

extern "C" fn reap_at_exit() {
    // Unwinding out of an atexit handler aborts
    let _ = panic::catch_unwind(AssertUnwindSafe(|| match reap_remaining() {
        Ok(0) => {}
        Ok(reaped) => info!(reaped, "Reaped remaining children at exit"),
        Err(e) => warn!(error = %e, "Failed to reap children at exit"),
    }));
}
