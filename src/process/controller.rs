/*!
 * Process Controller
 * Registration and reaping of the children of the current OS process
 *
 * # Ownership
 *
 * A controller belongs to exactly one process image. After fork() the child
 * must call `forked()` and use the returned controller: the inherited one
 * belongs to the parent, whose children the child can never reap.
 * Registrations live in the process-wide table of `process::registry`.
 *
 * # Signals
 *
 * SIGCHLD only marks a reap as pending (see `signals::child`). `dispatch()`
 * drains that mark from ordinary control flow, so the child table is never
 * mutated in signal context.
 */

use super::handle::ProcessHandle;
use super::registry;
use super::types::{Termination, WaitOutcome, WaitTarget};
use crate::core::errors::{ProcessError, ProcessResult};
use crate::core::types::{current_pid, to_nix, Pid};
use crate::signals;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use parking_lot::{const_mutex, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

static GLOBAL: Mutex<Option<Controller>> = const_mutex(None);
static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

struct Inner {
    id: u64,
    owner: Pid,
}

/// Reaping controller scoped to one OS process
///
/// Several controllers may coexist in one process. Their registrations share
/// the process-wide child table, so a wait on any of them routes every exit
/// to the right handle.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    /// Controller owned by the calling process
    pub fn new() -> ProcessResult<Self> {
        signals::install()?;
        let controller = Self::owned_by(current_pid());
        info!(owner = controller.owner(), "Process controller initialized");
        Ok(controller)
    }

    /// Process-wide default controller, created on first use
    ///
    /// A default inherited across fork() is replaced by a fresh one.
    pub fn global() -> ProcessResult<Self> {
        let mut slot = GLOBAL.lock();
        if let Some(controller) = slot.as_ref() {
            if controller.owner() == current_pid() {
                return Ok(controller.clone());
            }
            debug!(stale_owner = controller.owner(), "Replacing inherited default controller");
        }

        let controller = Self::new()?;
        *slot = Some(controller.clone());
        Ok(controller)
    }

    fn owned_by(owner: Pid) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
                owner,
            }),
        }
    }

    /// PID of the process this controller belongs to
    #[inline]
    #[must_use]
    pub fn owner(&self) -> Pid {
        self.inner.owner
    }

    /// Running children registered through this controller
    #[must_use]
    pub fn len(&self) -> usize {
        registry::count(self.inner.id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, pid: Pid) -> bool {
        registry::contains(pid, self.inner.id)
    }

    /// Replace this (inherited) controller in a freshly forked child
    pub fn forked(&self) -> ProcessResult<Self> {
        let pid = current_pid();
        if pid == self.owner() {
            return Err(ProcessError::NotForked {
                pid,
                owner: self.owner(),
            });
        }

        signals::child::reset();
        registry::reset_after_fork();
        let fresh = Self::owned_by(pid);

        // try_lock: another parent thread may have held it across fork()
        if let Some(mut slot) = GLOBAL.try_lock() {
            if slot.as_ref().map_or(true, |c| c.owner() != pid) {
                *slot = Some(fresh.clone());
            }
        }

        Ok(fresh)
    }

    pub(crate) fn ensure_owner(&self) -> ProcessResult<()> {
        let pid = current_pid();
        if pid != self.owner() {
            return Err(ProcessError::ForeignController {
                pid,
                owner: self.owner(),
            });
        }
        Ok(())
    }

    /// Track a running child until it is reaped
    pub fn register(&self, handle: &ProcessHandle) -> ProcessResult<()> {
        self.ensure_owner()?;

        let target = handle.pid().unwrap_or(0);
        if target == 0 || kill(to_nix(target), None).is_err() {
            return Err(ProcessError::NotSignalable {
                pid: current_pid(),
                target,
            });
        }

        registry::insert(target, self.inner.id, handle.downgrade());
        debug!(pid = target, handle = handle.id(), controller = self.inner.id, "Process registered");
        Ok(())
    }

    /// Block until one child (any, or a specific one) changes state
    ///
    /// A reaped child registered by another controller of this process is
    /// still routed to its handle. A registered child the OS no longer
    /// reports is dropped and surfaces as `LostChildren`.
    pub fn wait(&self, target: WaitTarget) -> ProcessResult<WaitOutcome> {
        if self.is_empty() {
            return Ok(WaitOutcome::NoChildren);
        }

        let pid = match target {
            WaitTarget::Any => None,
            WaitTarget::Pid(pid) => Some(to_nix(pid)),
        };

        match waitpid(pid, None) {
            Ok(status) => match Termination::from_wait_status(status) {
                Some((pid, termination)) => registry::route(pid, termination),
                None => Ok(WaitOutcome::Interrupted),
            },
            Err(Errno::EINTR) => Ok(WaitOutcome::Interrupted),
            Err(Errno::ECHILD) => self.lost(target),
            Err(errno) => Err(ProcessError::WaitFailed {
                pid: current_pid(),
                errno,
            }),
        }
    }

    /// Reap whatever SIGCHLD announced since the last call
    ///
    /// Returns the number of children reaped.
    pub fn dispatch(&self) -> ProcessResult<usize> {
        if !signals::take_pending() {
            return Ok(0);
        }
        self.reap_ready()
    }

    /// Non-blocking reap of every registered child that has already exited
    ///
    /// Covers the children of every controller in this process, since the
    /// SIGCHLD mark is shared by all of them.
    pub fn reap_ready(&self) -> ProcessResult<usize> {
        let mut reaped = 0;

        for pid in registry::pids(None) {
            match waitpid(Some(to_nix(pid)), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => {
                    if let Some((pid, termination)) = Termination::from_wait_status(status) {
                        if let WaitOutcome::Reaped(_) = registry::route(pid, termination)? {
                            reaped += 1;
                        }
                    }
                }
                Err(Errno::EINTR) => {}
                Err(Errno::ECHILD) => {
                    warn!(pid, "Registered child was reaped elsewhere");
                    registry::forget(pid);
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

    /// Block until every child registered here has been reaped
    pub fn reap_all(&self) -> ProcessResult<()> {
        while !self.is_empty() {
            if self.wait(WaitTarget::Any)? == WaitOutcome::NoChildren {
                break;
            }
        }
        Ok(())
    }

    /// ECHILD for registered children: forget them and report the loss
    fn lost(&self, target: WaitTarget) -> ProcessResult<WaitOutcome> {
        let count = match target {
            WaitTarget::Any => registry::forget_all(self.inner.id),
            WaitTarget::Pid(pid) => match registry::forget(pid) {
                Some(_) => 1,
                None => 0,
            },
        };

        if count == 0 {
            return Ok(WaitOutcome::NoChildren);
        }
        Err(ProcessError::LostChildren {
            pid: current_pid(),
            count,
        })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Only the owner may reap; a child's inherited copy just goes away
        if self.owner != current_pid() {
            return;
        }

        let pids = registry::pids(Some(self.id));
        if pids.is_empty() {
            return;
        }

        info!(count = pids.len(), "Controller dropped with live children, reaping");
        for pid in pids {
            loop {
                match waitpid(Some(to_nix(pid)), None) {
                    Ok(status) => {
                        if let Some((pid, termination)) = Termination::from_wait_status(status) {
                            if let Err(e) = registry::route(pid, termination) {
                                warn!(pid, error = %e, "Failed to finalize reaped child");
                            }
                            break;
                        }
                    }
                    Err(Errno::EINTR) => continue,
                    Err(errno) => {
                        warn!(pid, %errno, "Failed to reap child on controller drop");
                        registry::forget(pid);
                        break;
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pids = registry::pids(Some(self.inner.id));
        pids.sort_unstable();
        f.debug_struct("Controller")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("registry", &pids)
            .finish()
    }
}
