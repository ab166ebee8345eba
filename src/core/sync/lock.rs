/*!
 * Named Lock
 * Lazily-created SysV counting semaphore shared across fork()
 *
 * The semaphore lives in the kernel, so a child forked while the parent holds
 * it observes the same counter. `touch()` turns it into a rendezvous: the
 * child blocks until the parent releases, then immediately lets go.
 */

use super::key::LockKey;
use crate::core::errors::{ProcessError, ProcessResult};
use crate::core::limits::{DEFAULT_LOCK_MODE, DEFAULT_MAX_ACQUIRE};
use crate::core::types::{current_pid, Pid};
use nix::errno::Errno;
use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, warn};

/// Lock creation options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Concurrent holders allowed
    pub max_acquire: u16,
    /// Permission bits
    pub mode: u32,
    /// Remove the semaphore when the creating process drops the lock
    pub auto_remove: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            max_acquire: DEFAULT_MAX_ACQUIRE,
            mode: DEFAULT_LOCK_MODE,
            auto_remove: true,
        }
    }
}

impl LockOptions {
    #[inline]
    #[must_use]
    pub fn with_max_acquire(mut self, max_acquire: u16) -> Self {
        self.max_acquire = max_acquire;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }
}

/// Named counting semaphore
pub struct Lock {
    key: LockKey,
    options: LockOptions,
    creator: Pid,
    semid: Mutex<Option<libc::c_int>>,
}

impl Lock {
    /// Lock for `name` with default options
    pub fn new(name: &str) -> ProcessResult<Self> {
        Self::with_options(name, LockOptions::default())
    }

    pub fn with_options(name: &str, options: LockOptions) -> ProcessResult<Self> {
        Ok(Self::with_key(LockKey::for_name(name)?, options))
    }

    /// Lock for an explicit key; nothing is created until first use
    #[must_use]
    pub fn with_key(key: LockKey, options: LockOptions) -> Self {
        Self {
            key,
            options,
            creator: current_pid(),
            semid: Mutex::new(None),
        }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> LockKey {
        self.key
    }

    #[inline]
    #[must_use]
    pub fn options(&self) -> LockOptions {
        self.options
    }

    /// PID of the process that constructed this lock
    #[inline]
    #[must_use]
    pub fn creator(&self) -> Pid {
        self.creator
    }

    /// Whether this handle has created or attached to the semaphore
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.semid.lock().is_some()
    }

    /// Whether a semaphore with this key currently exists in the kernel
    #[must_use]
    pub fn exists(&self) -> bool {
        // SAFETY: semget has no memory-safety preconditions
        unsafe { libc::semget(self.key.as_raw(), 0, 0) != -1 }
    }

    /// Block until the lock is held
    pub fn acquire(&self) -> ProcessResult<()> {
        let semid = self.ensure_created()?;
        self.semop(semid, -1, "semop(acquire)")
    }

    pub fn release(&self) -> ProcessResult<()> {
        let semid = self.ensure_created()?;
        self.semop(semid, 1, "semop(release)")
    }

    /// Acquire and immediately release; a barrier, not a critical section
    pub fn touch(&self) -> ProcessResult<()> {
        self.acquire()?;
        self.release()
    }

    /// Create the semaphore now, refusing to attach to an existing one
    ///
    /// Returns `false` if another semaphore already uses this key.
    pub fn create_exclusive(&self) -> ProcessResult<bool> {
        let mut semid = self.semid.lock();
        if semid.is_some() {
            return Ok(true);
        }

        match self.create_new()? {
            Some(id) => {
                *semid = Some(id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Destroy the semaphore regardless of who holds it
    pub fn remove(&self) -> ProcessResult<()> {
        let mut semid = self.semid.lock();
        let Some(id) = *semid else {
            return Ok(());
        };

        // SAFETY: IPC_RMID takes no fourth argument
        if unsafe { libc::semctl(id, 0, libc::IPC_RMID) } == -1 {
            return Err(self.error("semctl(IPC_RMID)", Errno::last()));
        }

        *semid = None;
        debug!(key = %self.key, semid = id, "Semaphore removed");
        Ok(())
    }

    fn ensure_created(&self) -> ProcessResult<libc::c_int> {
        let mut semid = self.semid.lock();
        if let Some(id) = *semid {
            return Ok(id);
        }

        let id = self.create()?;
        *semid = Some(id);
        Ok(id)
    }

    fn create(&self) -> ProcessResult<libc::c_int> {
        if let Some(id) = self.create_new()? {
            return Ok(id);
        }

        // SAFETY: semget has no memory-safety preconditions
        let id = unsafe { libc::semget(self.key.as_raw(), 1, self.options.mode as libc::c_int) };
        if id == -1 {
            return Err(self.error("semget", Errno::last()));
        }
        debug!(key = %self.key, semid = id, "Attached to existing semaphore");
        Ok(id)
    }

    /// Create and initialize the semaphore; `None` if the key is taken
    fn create_new(&self) -> ProcessResult<Option<libc::c_int>> {
        let mode = self.options.mode as libc::c_int;

        // SAFETY: semget has no memory-safety preconditions
        let id = unsafe { libc::semget(self.key.as_raw(), 1, libc::IPC_CREAT | libc::IPC_EXCL | mode) };
        if id == -1 {
            return match Errno::last() {
                Errno::EEXIST => Ok(None),
                errno => Err(self.error("semget", errno)),
            };
        }

        let value = libc::c_int::from(self.options.max_acquire);
        // SAFETY: SETVAL reads an int-sized semun, passed by value
        if unsafe { libc::semctl(id, 0, libc::SETVAL, value) } == -1 {
            return Err(self.error("semctl(SETVAL)", Errno::last()));
        }
        debug!(key = %self.key, semid = id, value, "Semaphore created");
        Ok(Some(id))
    }

    fn semop(&self, semid: libc::c_int, delta: libc::c_short, op: &'static str) -> ProcessResult<()> {
        let mut buf = libc::sembuf {
            sem_num: 0,
            sem_op: delta,
            sem_flg: libc::SEM_UNDO as libc::c_short,
        };

        loop {
            // SAFETY: buf is a valid sembuf and nsops matches its length
            if unsafe { libc::semop(semid, &mut buf, 1) } == 0 {
                return Ok(());
            }

            match Errno::last() {
                // A signal (usually SIGCHLD) arrived while blocked
                Errno::EINTR => continue,
                errno => return Err(self.error(op, errno)),
            }
        }
    }

    fn error(&self, op: &'static str, errno: Errno) -> ProcessError {
        ProcessError::Semaphore {
            pid: current_pid(),
            key: self.key.as_raw(),
            op,
            errno,
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        // A child that inherited the lock must not destroy the parent's semaphore
        if !self.options.auto_remove || self.creator != current_pid() {
            return;
        }

        if let Err(e) = self.remove() {
            warn!(error = %e, "Failed to auto-remove semaphore");
        }
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.key)
            .field("options", &self.options)
            .field("creator", &self.creator)
            .field("semid", &*self.semid.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT: AtomicU32 = AtomicU32::new(0);

    fn unique_lock() -> Lock {
        let name = format!(
            "forkq-lock-test:{}:{}",
            current_pid(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        );
        Lock::new(&name).unwrap()
    }

    #[test]
    fn test_creation_is_lazy() {
        let lock = unique_lock();
        assert!(!lock.is_created());
        assert!(!lock.exists());

        lock.acquire().unwrap();
        assert!(lock.is_created());
        assert!(lock.exists());
        lock.release().unwrap();
    }

    #[test]
    fn test_touch_leaves_lock_free() {
        let lock = unique_lock();
        lock.touch().unwrap();
        lock.touch().unwrap();
        // Still acquirable, so touch released what it took
        lock.acquire().unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn test_remove_destroys_semaphore() {
        let lock = unique_lock();
        lock.acquire().unwrap();
        lock.remove().unwrap();
        assert!(!lock.is_created());
        assert!(!lock.exists());

        // Removing twice is a no-op
        lock.remove().unwrap();
    }

    #[test]
    fn test_drop_auto_removes_in_creator() {
        let lock = unique_lock();
        lock.touch().unwrap();
        let key = lock.key();
        drop(lock);

        let lookup = Lock::with_key(key, LockOptions::default().with_auto_remove(false));
        assert!(!lookup.exists());
    }

    #[test]
    fn test_drop_keeps_semaphore_without_auto_remove() {
        let name = format!("forkq-lock-test:keep:{}", current_pid());
        let options = LockOptions::default().with_auto_remove(false);
        let lock = Lock::with_options(&name, options).unwrap();
        lock.touch().unwrap();
        let key = lock.key();
        drop(lock);

        let lookup = Lock::with_key(key, LockOptions::default());
        assert!(lookup.exists());
        lookup.touch().unwrap();
        // lookup attached and auto-removes on drop
    }

    #[test]
    fn test_counting_semaphore_allows_multiple_holders() {
        let name = format!("forkq-lock-test:count:{}", current_pid());
        let lock = Lock::with_options(&name, LockOptions::default().with_max_acquire(2)).unwrap();
        lock.acquire().unwrap();
        lock.acquire().unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn test_create_exclusive_refuses_taken_key() {
        let first = unique_lock();
        assert!(first.create_exclusive().unwrap());
        assert!(first.is_created());

        let second = Lock::with_key(first.key(), LockOptions::default());
        assert!(!second.create_exclusive().unwrap());
        assert!(!second.is_created());

        // Dropping the loser leaves the winner's semaphore alone
        drop(second);
        assert!(first.exists());
        first.touch().unwrap();
    }
}
