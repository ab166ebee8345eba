/*!
 * Limits and Constants
 *
 * Centralized location for defaults, exit codes and environment variable names.
 */

use super::types::ExitCode;

// =============================================================================
// QUEUE / POOL
// =============================================================================

/// Default concurrency of a worker pool
pub const DEFAULT_MAX_WORKERS: usize = 20;

/// Queue limit meaning "no bound"
pub const UNBOUNDED: usize = 0;

/// Default queue priority
pub const DEFAULT_PRIORITY: i32 = 0;

// =============================================================================
// SEMAPHORES
// =============================================================================

/// Default holders of a lock (a binary semaphore)
pub const DEFAULT_MAX_ACQUIRE: u16 = 1;

/// Default permission bits of a lock
pub const DEFAULT_LOCK_MODE: u32 = 0o600;

/// Salted names tried before a handshake lock gives up on key collisions
pub const MAX_LOCK_SALTS: u32 = 16;

// =============================================================================
// CHILD EXIT CODES
// =============================================================================

/// Exit code of a child whose workload panicked (matches the Rust runtime)
pub const PANIC_EXIT_CODE: ExitCode = 101;

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Queue concurrency limit override
pub const ENV_QUEUE_LIMIT: &str = "FORKQ_QUEUE_LIMIT";

/// Queue autostart flag override
pub const ENV_QUEUE_AUTOSTART: &str = "FORKQ_AUTOSTART";

/// Queue block flag override
pub const ENV_QUEUE_BLOCK: &str = "FORKQ_BLOCK";

/// JSON log output switch
pub const ENV_TRACE_JSON: &str = "FORKQ_TRACE_JSON";
