/*!
 * Process Handle Tests
 * Fork, lifecycle transitions, listeners and the fork handshake
 */

use forkq::{Controller, Event, ProcessError, ProcessHandle, ProcessStatus, Signal, Termination};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn spawn<F>(controller: &Controller, workload: F) -> ProcessHandle
where
    F: FnOnce(&ProcessHandle) -> i32 + Send + 'static,
{
    ProcessHandle::new(workload)
        .unwrap()
        .with_controller(controller.clone())
}

#[test]
#[serial]
fn test_zero_exit_is_finished() {
    let controller = Controller::new().unwrap();
    let handle = spawn(&controller, |_| 0);

    let pid = handle.run().unwrap();
    assert_eq!(handle.pid(), Some(pid));
    assert_eq!(handle.status(), ProcessStatus::Running);
    assert!(controller.contains(pid));

    handle.join().unwrap();
    assert_eq!(handle.status(), ProcessStatus::Finished);
    assert_eq!(handle.exit_code(), 0);
    assert_eq!(handle.signal(), None);
    assert!(!controller.contains(pid));
}

#[test]
#[serial]
fn test_non_zero_exit_is_failure() {
    let controller = Controller::new().unwrap();
    let handle = spawn(&controller, |_| 7);

    handle.run().unwrap();
    handle.join().unwrap();

    assert_eq!(handle.status(), ProcessStatus::Failure);
    assert_eq!(handle.exit_code(), 7);
}

#[test]
#[serial]
fn test_killed_before_exit_is_killed() {
    let controller = Controller::new().unwrap();
    let handle = spawn(&controller, |_| {
        thread::sleep(Duration::from_secs(30));
        0
    });

    handle.run().unwrap();
    handle.kill(Signal::SIGTERM).unwrap();

    // Killing is advisory until the exit is reaped
    assert_eq!(handle.status(), ProcessStatus::Running);

    handle.join().unwrap();
    assert_eq!(handle.status(), ProcessStatus::Killed);
    assert_eq!(handle.signal(), Some(Signal::SIGTERM));
}

#[test]
#[serial]
fn test_panicking_workload_fails() {
    let controller = Controller::new().unwrap();
    let handle = spawn(&controller, |_| panic!("workload blew up"));

    handle.run().unwrap();
    handle.join().unwrap();

    assert_eq!(handle.status(), ProcessStatus::Failure);
    assert_eq!(handle.exit_code(), 101);
}

#[test]
#[serial]
fn test_kill_after_exit_is_contract_error() {
    let controller = Controller::new().unwrap();
    let handle = spawn(&controller, |_| 0);

    handle.run().unwrap();
    handle.join().unwrap();

    let err = handle.kill(Signal::SIGTERM).unwrap_err();
    assert_eq!(
        err,
        ProcessError::InvalidState {
            expected: ProcessStatus::Running,
            actual: ProcessStatus::Finished,
        }
    );
}

#[test]
#[serial]
fn test_exited_twice_is_contract_error() {
    let controller = Controller::new().unwrap();
    let handle = spawn(&controller, |_| 0);

    handle.run().unwrap();
    handle.join().unwrap();

    let err = handle.exited(Termination::Exited(0)).unwrap_err();
    assert!(err.is_contract());
    assert_eq!(handle.status(), ProcessStatus::Finished);
}

#[test]
#[serial]
fn test_run_twice_is_contract_error() {
    let controller = Controller::new().unwrap();
    let handle = spawn(&controller, |_| 0);

    handle.run().unwrap();
    let err = handle.run().unwrap_err();
    assert_eq!(
        err,
        ProcessError::InvalidState {
            expected: ProcessStatus::Pending,
            actual: ProcessStatus::Running,
        }
    );

    handle.join().unwrap();
}

#[test]
#[serial]
fn test_listeners_fire_in_registration_order() {
    let controller = Controller::new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handle = spawn(&controller, |_| 3);

    for tag in ["first", "second"] {
        let log = Arc::clone(&log);
        handle.add_event_listener(Event::Start, move |h, event| {
            assert_eq!(h.status(), ProcessStatus::Running);
            log.lock().push(format!("{event}:{tag}"));
        });
    }
    for tag in ["first", "second"] {
        let log = Arc::clone(&log);
        handle.add_event_listener(Event::Exit, move |h, event| {
            assert_eq!(h.status(), ProcessStatus::Failure);
            log.lock().push(format!("{event}:{tag}"));
        });
    }

    handle.run().unwrap();
    assert_eq!(*log.lock(), vec!["start:first", "start:second"]);

    handle.join().unwrap();
    assert_eq!(
        *log.lock(),
        vec!["start:first", "start:second", "exit:first", "exit:second"]
    );
}

#[test]
#[serial]
fn test_deferred_release_parks_child() {
    let controller = Controller::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");

    let child_marker = marker.clone();
    let handle = spawn(&controller, move |_| {
        std::fs::write(&child_marker, b"ran").map_or(1, |_| 0)
    });

    handle.run_deferred().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(!marker.exists(), "child ran before the handshake lock was released");

    handle.release_lock().unwrap();
    handle.join().unwrap();

    assert_eq!(handle.status(), ProcessStatus::Finished);
    assert!(marker.exists());
}

#[test]
#[serial]
fn test_workload_receives_running_handle() {
    let controller = Controller::new().unwrap();
    let handle = spawn(&controller, |h| {
        let own_pid = forkq::core::current_pid();
        if h.status() == ProcessStatus::Running && h.pid() == Some(own_pid) {
            0
        } else {
            1
        }
    });

    handle.run().unwrap();
    handle.join().unwrap();
    assert_eq!(handle.status(), ProcessStatus::Finished);
}

#[test]
#[serial]
fn test_join_terminal_is_noop() {
    let controller = Controller::new().unwrap();
    let handle = spawn(&controller, |_| 0);

    handle.run().unwrap();
    handle.join().unwrap();
    handle.join().unwrap();
    assert_eq!(handle.status(), ProcessStatus::Finished);
}
