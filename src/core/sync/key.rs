/*!
 * Lock Keys
 * Deterministic SysV IPC keys derived from a name and the executable inode
 */

use crate::core::errors::{ProcessError, ProcessResult};
use crate::core::types::current_pid;
use sha2::{Digest, Sha256};
use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::sync::OnceLock;

static IMAGE_INODE: OnceLock<u64> = OnceLock::new();

/// SysV IPC key of a named lock
///
/// The same name inside the same executable always maps to the same key,
/// while other binaries using the same name land elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey(libc::key_t);

impl LockKey {
    /// Derive a key from `name` and an inode
    #[must_use]
    pub fn derive(name: &str, inode: u64) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let tail = u32::from_be_bytes([digest[28], digest[29], digest[30], digest[31]]);
        let raw = tail.wrapping_add(inode as u32) as libc::key_t;

        // 0 is IPC_PRIVATE, which would create an unshareable semaphore
        Self(if raw == 0 { 1 } else { raw })
    }

    /// Derive a key from `name` and the inode of the running executable
    pub fn for_name(name: &str) -> ProcessResult<Self> {
        Ok(Self::derive(name, image_inode()?))
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: libc::key_t) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> libc::key_t {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Inode of the running executable, looked up once per process
pub fn image_inode() -> ProcessResult<u64> {
    if let Some(inode) = IMAGE_INODE.get() {
        return Ok(*inode);
    }

    let inode = std::env::current_exe()
        .and_then(std::fs::metadata)
        .map(|meta| meta.ino())
        .map_err(|e| ProcessError::ExecutableInode {
            pid: current_pid(),
            reason: e.to_string(),
        })?;

    Ok(*IMAGE_INODE.get_or_init(|| inode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        assert_eq!(LockKey::derive("queue", 1234), LockKey::derive("queue", 1234));
    }

    #[test]
    fn test_derive_separates_names_and_inodes() {
        assert_ne!(LockKey::derive("queue", 1234), LockKey::derive("pool", 1234));
        assert_ne!(LockKey::derive("queue", 1234), LockKey::derive("queue", 1235));
    }

    #[test]
    fn test_derive_never_private() {
        let digest = Sha256::digest(b"x");
        let tail = u32::from_be_bytes([digest[28], digest[29], digest[30], digest[31]]);
        // Pick the inode that would wrap the sum to zero
        let inode = u64::from(tail.wrapping_neg());
        assert_eq!(LockKey::derive("x", inode).as_raw(), 1);
    }

    #[test]
    fn test_image_inode_is_cached() {
        let first = image_inode().unwrap();
        assert_eq!(image_inode().unwrap(), first);
        assert_eq!(
            LockKey::for_name("same").unwrap(),
            LockKey::derive("same", first)
        );
    }
}
