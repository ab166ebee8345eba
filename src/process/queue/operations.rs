/*!
 * Queue Core Operations
 * Insert, admit, start, wait, stop and limit changes
 */

use super::entry::Entry;
use super::Queue;
use crate::core::errors::{ProcessError, ProcessResult};
use crate::core::types::{current_pid, ExitCode, Priority};
use crate::process::handle::ProcessHandle;
use crate::process::types::{Event, ProcessStatus, WaitOutcome, WaitTarget};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl Queue {
    /// Queue a pending handle
    pub fn insert(&self, handle: ProcessHandle, priority: Priority) -> ProcessResult<()> {
        let status = handle.status();
        if status != ProcessStatus::Pending {
            return Err(ProcessError::InvalidState {
                expected: ProcessStatus::Pending,
                actual: status,
            });
        }

        handle.bind_controller_if_unset(&self.inner.controller);
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        debug!(handle = handle.id(), priority, seq, "Job queued");
        self.inner.state.lock().pending.push(Entry::new(handle, priority, seq));

        self.poll()?;

        let run_now = {
            let state = self.inner.state.lock();
            state.config.autostart || !state.active.is_empty()
        };
        if run_now {
            self.execute()?;
        }
        Ok(())
    }

    /// Wrap a bare workload into a handle and queue it
    pub fn insert_fn<F>(&self, workload: F, priority: Priority) -> ProcessResult<ProcessHandle>
    where
        F: FnOnce(&ProcessHandle) -> ExitCode + Send + 'static,
    {
        let handle = ProcessHandle::new(workload)?.with_controller(self.inner.controller.clone());
        self.insert(handle.clone(), priority)?;
        Ok(handle)
    }

    /// Admit pending jobs, optionally waiting for all of them
    pub fn start(&self, block: bool) -> ProcessResult<()> {
        self.poll()?;
        self.execute()?;

        if block || self.config().block {
            self.wait()?;
        }
        self.take_deferred_error()
    }

    /// Block until no job is active
    pub fn wait(&self) -> ProcessResult<()> {
        loop {
            let active = self.active_count();
            if active == 0 {
                break;
            }

            if self.inner.controller.wait(WaitTarget::Any)? == WaitOutcome::NoChildren {
                return Err(ProcessError::LostChildren {
                    pid: current_pid(),
                    count: active,
                });
            }
        }
        self.take_deferred_error()
    }

    /// Send SIGTERM to every active job without waiting
    pub fn stop(&self) -> ProcessResult<()> {
        let mut first_error = None;
        for handle in self.active() {
            if let Err(e) = handle.terminate() {
                warn!(handle = handle.id(), error = %e, "Failed to stop job");
                first_error.get_or_insert(e);
            }
        }

        info!("Queue stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Change the concurrency limit (0 = unbounded)
    pub fn set_limit(&self, limit: usize) -> ProcessResult<()> {
        let (raised, active) = {
            let mut state = self.inner.state.lock();
            let old = state.config.limit;
            state.config.limit = limit;
            let raised = old != 0 && (limit == 0 || limit > old);
            (raised, !state.active.is_empty())
        };

        if raised && active {
            self.execute()?;
        }
        Ok(())
    }

    /// Route exits announced by SIGCHLD; returns the number reaped
    pub fn poll(&self) -> ProcessResult<usize> {
        self.inner.controller.dispatch()
    }

    /// Admit while capacity and pending jobs remain
    pub(super) fn execute(&self) -> ProcessResult<()> {
        loop {
            let entry = {
                let mut state = self.inner.state.lock();
                if state.is_maxed() {
                    break;
                }
                match state.pending.pop() {
                    Some(entry) => entry,
                    None => break,
                }
            };
            self.admit(entry)?;
        }
        Ok(())
    }

    /// Fork one job; it becomes active before its handshake lock is released
    fn admit(&self, entry: Entry) -> ProcessResult<()> {
        let handle = entry.handle.clone();

        let pid = match handle.run_deferred() {
            Ok(pid) => pid,
            Err(e) => {
                if handle.status() == ProcessStatus::Pending {
                    self.inner.state.lock().pending.push(entry);
                }
                return Err(e);
            }
        };

        // The child is still parked on the handshake, so no exit can be missed
        let queue = Arc::downgrade(&self.inner);
        handle.add_event_listener(Event::Exit, move |job, _| {
            if let Some(inner) = queue.upgrade() {
                Queue { inner }.job_exited(job);
            }
        });

        let active = {
            let mut state = self.inner.state.lock();
            state.active.insert(pid, handle.clone());
            state.active.len()
        };
        self.inner.stats.record_admitted(active);
        debug!(pid, handle = handle.id(), priority = entry.key.priority, active, "Job admitted");

        handle.release_lock()
    }

    fn job_exited(&self, job: &ProcessHandle) {
        let Some(pid) = job.pid() else {
            return;
        };

        {
            let mut state = self.inner.state.lock();
            let Some(handle) = state.active.remove(&pid) else {
                return;
            };
            state.finished.push(handle);
        }
        self.inner.stats.record_exit(job.status());

        if let Err(e) = self.execute() {
            error!(error = %e, "Admission after job exit failed");
            self.inner.state.lock().deferred_error.get_or_insert(e);
        }
    }

    fn take_deferred_error(&self) -> ProcessResult<()> {
        match self.inner.state.lock().deferred_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
