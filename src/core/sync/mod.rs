/*!
 * Synchronization Primitives
 *
 * Cross-process locking built on SysV semaphores:
 * - Key derivation from a name and the executable inode
 * - Lazily-created counting semaphore with creator-owned cleanup
 */

mod key;
mod lock;

pub use key::{image_inode, LockKey};
pub use lock::{Lock, LockOptions};
