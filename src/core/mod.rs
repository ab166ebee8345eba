/*!
 * Core Module
 * Shared types, errors, limits and synchronization primitives
 */

pub(crate) mod env;
pub mod errors;
pub mod limits;
pub mod sync;
pub mod types;

pub use errors::{ProcessError, ProcessResult};
pub use types::{current_pid, ExitCode, Pid, Priority, EXIT_FAILURE, EXIT_SUCCESS};
