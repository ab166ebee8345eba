/*!
 * Process Handle
 * One forked OS process: identity, status state machine, exit code, listeners
 *
 * # Fork handshake
 *
 * The parent acquires the handle's private lock before fork(). The child
 * `touch()`es it as its first action, so it cannot run (or exit) until the
 * parent has registered it with the controller and released the lock. A
 * scheduler may defer the release to finish its own bookkeeping first
 * (`run_deferred` + `release_lock`).
 */

use super::controller::Controller;
use super::listeners::{Listener, Listeners};
use super::types::{Event, ProcessStatus, Termination, WaitOutcome, WaitTarget};
use crate::core::errors::{ProcessError, ProcessResult};
use crate::core::limits::{MAX_LOCK_SALTS, PANIC_EXIT_CODE};
use crate::core::sync::Lock;
use crate::core::types::{current_pid, from_nix, to_nix, ExitCode, Pid, EXIT_FAILURE};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{fork, ForkResult};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Workload executed in the forked child; its return value is the exit code
pub type Workload = Box<dyn FnOnce(&ProcessHandle) -> ExitCode + Send>;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy)]
struct State {
    pid: Option<Pid>,
    status: ProcessStatus,
    exit_code: ExitCode,
    signal: Option<Signal>,
}

struct Inner {
    id: u64,
    state: RwLock<State>,
    workload: Mutex<Option<Workload>>,
    listeners: Mutex<Listeners>,
    lock: Lock,
    controller: Mutex<Option<Controller>>,
}

/// Handle to a forked process
///
/// Cloning is cheap and every clone observes the same process.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<Inner>,
}

/// Non-owning reference held by the controller registry
#[derive(Clone)]
pub(crate) struct WeakHandle(Weak<Inner>);

impl WeakHandle {
    pub fn upgrade(&self) -> Option<ProcessHandle> {
        self.0.upgrade().map(|inner| ProcessHandle { inner })
    }
}

impl ProcessHandle {
    /// Wrap a workload into a pending handle
    pub fn new<F>(workload: F) -> ProcessResult<Self>
    where
        F: FnOnce(&ProcessHandle) -> ExitCode + Send + 'static,
    {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        // pid + id keeps concurrent runs of the same binary apart
        let lock = handshake_lock(&format!("forkq:handle:{}:{}", current_pid(), id))?;

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                state: RwLock::new(State {
                    pid: None,
                    status: ProcessStatus::Pending,
                    exit_code: 0,
                    signal: None,
                }),
                workload: Mutex::new(Some(Box::new(workload))),
                listeners: Mutex::new(Listeners::default()),
                lock,
                controller: Mutex::new(None),
            }),
        })
    }

    /// Bind the controller this handle registers with
    #[must_use]
    pub fn with_controller(self, controller: Controller) -> Self {
        *self.inner.controller.lock() = Some(controller);
        self
    }

    pub(crate) fn bind_controller_if_unset(&self, controller: &Controller) {
        let mut slot = self.inner.controller.lock();
        if slot.is_none() {
            *slot = Some(controller.clone());
        }
    }

    /// Controller this handle is bound to, if any
    ///
    /// Inside a running workload this is the child's own fresh controller.
    #[must_use]
    pub fn controller(&self) -> Option<Controller> {
        self.inner.controller.lock().clone()
    }

    /// Process-unique handle number
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// OS PID, once forked
    #[must_use]
    pub fn pid(&self) -> Option<Pid> {
        self.inner.state.read().pid
    }

    #[must_use]
    pub fn status(&self) -> ProcessStatus {
        self.inner.state.read().status
    }

    /// Exit code; meaningful once the status is terminal
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        self.inner.state.read().exit_code
    }

    /// Signal that killed the process, if it was killed
    #[must_use]
    pub fn signal(&self) -> Option<Signal> {
        self.inner.state.read().signal
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == ProcessStatus::Running
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Append a listener; listeners of an event run in registration order
    pub fn add_event_listener<F>(&self, event: Event, listener: F) -> &Self
    where
        F: Fn(&ProcessHandle, Event) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        self.inner.listeners.lock().add(event, listener);
        self
    }

    #[must_use]
    pub fn listener_count(&self, event: Event) -> usize {
        self.inner.listeners.lock().count(event)
    }

    /// Fork and run the workload in the child
    pub fn run(&self) -> ProcessResult<Pid> {
        self.spawn(false)
    }

    /// Fork, leaving the child blocked until `release_lock()` is called
    pub fn run_deferred(&self) -> ProcessResult<Pid> {
        self.spawn(true)
    }

    /// Release the handshake lock held since `run_deferred()`
    pub fn release_lock(&self) -> ProcessResult<()> {
        self.inner.lock.release()
    }

    /// Block until this process has been reaped
    pub fn join(&self) -> ProcessResult<()> {
        while let Ok(pid) = self.running_pid() {
            let controller = self.resolve_controller()?;
            if controller.wait(WaitTarget::Pid(pid))? == WaitOutcome::NoChildren {
                break;
            }
        }
        Ok(())
    }

    /// Send `signal`; the status only changes once the exit is reaped
    pub fn kill(&self, signal: Signal) -> ProcessResult<()> {
        let pid = self.running_pid()?;
        kill(to_nix(pid), signal).map_err(|errno| ProcessError::KillFailed {
            pid: current_pid(),
            target: pid,
            signal,
            errno,
        })?;

        debug!(pid, handle = self.inner.id, %signal, "Signal sent");
        Ok(())
    }

    /// Send SIGTERM
    pub fn terminate(&self) -> ProcessResult<()> {
        self.kill(Signal::SIGTERM)
    }

    /// Record the reaped exit of this process and notify listeners
    pub fn exited(&self, termination: Termination) -> ProcessResult<()> {
        let pid = self.running_pid()?;

        // Reaped processes no longer accept signals
        if kill(to_nix(pid), None).is_ok() {
            return Err(ProcessError::StillRunning { target: pid });
        }

        {
            let mut state = self.inner.state.write();
            if state.status != ProcessStatus::Running {
                return Err(ProcessError::InvalidState {
                    expected: ProcessStatus::Running,
                    actual: state.status,
                });
            }
            state.status = termination.status();
            state.exit_code = termination.exit_code();
            state.signal = termination.signal();
        }

        info!(
            pid,
            handle = self.inner.id,
            status = %termination.status(),
            exit_code = termination.exit_code(),
            "Process exited"
        );

        let removed = self.inner.lock.remove();
        self.fire(Event::Exit);
        removed
    }

    pub(crate) fn downgrade(&self) -> WeakHandle {
        WeakHandle(Arc::downgrade(&self.inner))
    }

    fn running_pid(&self) -> ProcessResult<Pid> {
        let state = self.inner.state.read();
        match (state.status, state.pid) {
            (ProcessStatus::Running, Some(pid)) => Ok(pid),
            (actual, _) => Err(ProcessError::InvalidState {
                expected: ProcessStatus::Running,
                actual,
            }),
        }
    }

    fn resolve_controller(&self) -> ProcessResult<Controller> {
        let mut slot = self.inner.controller.lock();
        if let Some(controller) = slot.as_ref() {
            return Ok(controller.clone());
        }

        let controller = Controller::global()?;
        *slot = Some(controller.clone());
        Ok(controller)
    }

    fn spawn(&self, defer_release: bool) -> ProcessResult<Pid> {
        let status = self.status();
        if status != ProcessStatus::Pending {
            return Err(ProcessError::InvalidState {
                expected: ProcessStatus::Pending,
                actual: status,
            });
        }

        let controller = self.resolve_controller()?;
        controller.ensure_owner()?;

        self.inner.lock.acquire()?;

        // SAFETY: the child only touches this handle, then leaves through _exit
        match unsafe { fork() } {
            Err(errno) => {
                if let Err(e) = self.inner.lock.release() {
                    warn!(error = %e, "Failed to release handshake lock after fork failure");
                }
                Err(ProcessError::ForkFailed {
                    pid: current_pid(),
                    errno,
                })
            }
            Ok(ForkResult::Child) => self.enter_child(&controller),
            Ok(ForkResult::Parent { child }) => {
                self.enter_parent(&controller, from_nix(child), defer_release)
            }
        }
    }

    fn enter_parent(&self, controller: &Controller, pid: Pid, defer_release: bool) -> ProcessResult<Pid> {
        {
            let mut state = self.inner.state.write();
            state.pid = Some(pid);
            state.status = ProcessStatus::Running;
        }
        // The closure only ever runs in the child
        drop(self.inner.workload.lock().take());

        if let Err(e) = controller.register(self) {
            if let Err(release) = self.inner.lock.release() {
                warn!(error = %release, "Failed to release handshake lock after registration failure");
            }
            return Err(e);
        }

        if !defer_release {
            self.inner.lock.release()?;
        }

        info!(pid, handle = self.inner.id, deferred = defer_release, "Process started");
        self.fire(Event::Start);
        Ok(pid)
    }

    fn enter_child(&self, controller: &Controller) -> ! {
        {
            let mut state = self.inner.state.write();
            state.pid = Some(current_pid());
            state.status = ProcessStatus::Running;
        }

        let code = match self.child_handshake(controller) {
            Ok(()) => self.execute(),
            Err(e) => {
                error!(error = %e, "Child handshake failed");
                EXIT_FAILURE
            }
        };

        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        // SAFETY: _exit skips atexit handlers and destructors the child does not own
        unsafe { libc::_exit(code) }
    }

    fn child_handshake(&self, controller: &Controller) -> ProcessResult<()> {
        let fresh = controller.forked()?;
        *self.inner.controller.lock() = Some(fresh);

        // Blocks until the parent has finished its bookkeeping
        self.inner.lock.touch()
    }

    fn execute(&self) -> ExitCode {
        let Some(workload) = self.inner.workload.lock().take() else {
            return EXIT_FAILURE;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| workload(self))) {
            Ok(code) => code,
            Err(_) => PANIC_EXIT_CODE,
        }
    }

    fn fire(&self, event: Event) {
        let listeners = self.inner.listeners.lock().snapshot(event);
        for listener in listeners {
            listener(self, event);
        }
    }
}

/// Create a private semaphore for the fork handshake
///
/// Keys are 32 bits, so two names can collide. A taken key is never shared:
/// the name is salted until a fresh semaphore can be created.
pub(crate) fn handshake_lock(base: &str) -> ProcessResult<Lock> {
    let mut last_key = None;
    for salt in 0..MAX_LOCK_SALTS {
        let name = if salt == 0 {
            base.to_owned()
        } else {
            format!("{base}:{salt}")
        };
        let lock = Lock::new(&name)?;
        if lock.create_exclusive()? {
            return Ok(lock);
        }
        debug!(key = %lock.key(), salt, "Handshake lock key taken, salting");
        last_key = Some(lock.key());
    }

    Err(ProcessError::Semaphore {
        pid: current_pid(),
        key: last_key.map_or(0, |key| key.as_raw()),
        op: "semget(IPC_EXCL)",
        errno: nix::errno::Errno::EEXIST,
    })
}

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ProcessHandle {}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.inner.state.read();
        f.debug_struct("ProcessHandle")
            .field("id", &self.inner.id)
            .field("pid", &state.pid)
            .field("status", &state.status)
            .field("exit_code", &state.exit_code)
            .field("signal", &state.signal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_handle_is_pending() {
        let handle = ProcessHandle::new(|_| 0).unwrap();
        assert_eq!(handle.status(), ProcessStatus::Pending);
        assert_eq!(handle.pid(), None);
        assert!(!handle.is_running());
        assert!(!handle.is_terminal());
    }

    #[test]
    fn test_handle_ids_are_unique() {
        let a = ProcessHandle::new(|_| 0).unwrap();
        let b = ProcessHandle::new(|_| 0).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_kill_pending_is_contract_error() {
        let handle = ProcessHandle::new(|_| 0).unwrap();
        let err = handle.kill(Signal::SIGTERM).unwrap_err();
        assert_eq!(
            err,
            ProcessError::InvalidState {
                expected: ProcessStatus::Running,
                actual: ProcessStatus::Pending,
            }
        );
    }

    #[test]
    fn test_exited_pending_is_contract_error() {
        let handle = ProcessHandle::new(|_| 0).unwrap();
        assert!(handle.exited(Termination::Exited(0)).unwrap_err().is_contract());
    }

    #[test]
    fn test_join_pending_is_noop() {
        let handle = ProcessHandle::new(|_| 0).unwrap();
        handle.join().unwrap();
        assert_eq!(handle.status(), ProcessStatus::Pending);
    }

    #[test]
    fn test_listeners_keep_registration_order() {
        let handle = ProcessHandle::new(|_| 0).unwrap();
        handle
            .add_event_listener(Event::Exit, |_, _| {})
            .add_event_listener(Event::Exit, |_, _| {});
        handle.add_event_listener(Event::Start, |_, _| {});
        assert_eq!(handle.listener_count(Event::Exit), 2);
        assert_eq!(handle.listener_count(Event::Start), 1);
    }

    #[test]
    fn test_handshake_lock_avoids_taken_key() {
        let base = format!("forkq-handle-test:salt:{}", current_pid());
        let occupied = Lock::new(&base).unwrap();
        assert!(occupied.create_exclusive().unwrap());

        let lock = handshake_lock(&base).unwrap();
        assert!(lock.is_created());
        assert_ne!(lock.key(), occupied.key());
        assert!(occupied.exists());
    }

    #[test]
    fn test_new_handle_owns_fresh_semaphore() {
        let handle = ProcessHandle::new(|_| 0).unwrap();
        assert!(handle.inner.lock.is_created());
        let key = handle.inner.lock.key();
        drop(handle);
        assert!(!Lock::with_key(key, crate::core::sync::LockOptions::default()).exists());
    }
}
