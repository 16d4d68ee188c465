/*!
 * Syscall Backend Traits
 * The narrow capability through which the engine touches the OS
 */

use super::types::*;
use crate::core::types::{Gid, Uid};

/// Every filesystem, mount and namespace call the engine performs
#[cfg_attr(test, mockall::automock)]
pub trait SyscallBackend: Send + Sync {
    /// mount(2)
    fn mount(&self, request: &MountRequest) -> BackendResult<()>;

    /// umount2(2), `MNT_DETACH` when `detach` is set
    fn umount(&self, target: &str, detach: bool) -> BackendResult<()>;

    /// symlink(2)
    fn symlink(&self, target: &str, link: &str) -> BackendResult<()>;

    /// Recursive mkdir with the given mode for created components
    fn create_dir_all(&self, path: &str, mode: u32) -> BackendResult<()>;

    /// Create an empty file if it does not exist
    fn create_file(&self, path: &str) -> BackendResult<()>;

    /// rmdir(2)
    fn remove_dir(&self, path: &str) -> BackendResult<()>;

    /// List entry names of a directory (dot entries excluded)
    fn read_dir(&self, path: &str) -> BackendResult<Vec<String>>;

    /// Whether a path exists
    fn exists(&self, path: &str) -> bool;

    fn chmod(&self, path: &str, mode: u32) -> BackendResult<()>;

    fn chown(&self, path: &str, uid: Uid, gid: Gid) -> BackendResult<()>;

    /// unshare(2) with the mount namespace always included
    fn unshare(&self, flags: NamespaceFlags) -> BackendResult<()>;

    /// Bring the loopback interface up in the current network namespace
    fn loopback_up(&self) -> BackendResult<()>;

    fn chdir(&self, path: &str) -> BackendResult<()>;

    fn chroot(&self, path: &str) -> BackendResult<()>;

    fn pivot_root(&self, new_root: &str, put_old: &str) -> BackendResult<()>;

    /// Open the FUSE device and hand back a raw descriptor that stays open
    fn open_fuse(&self) -> BackendResult<i32>;

    /// Current mount table (mountinfo format)
    fn mount_table(&self) -> BackendResult<String>;

    /// Issue one DEC control request
    fn dec_control(&self, command: DecCommand, request: &DecRequest) -> BackendResult<()>;

    /// Monotonic clock in nanoseconds
    fn monotonic_nanos(&self) -> u64;

    /// Check if this implementation is supported on the current platform
    fn is_supported(&self) -> bool;

    /// Get the platform type
    fn platform(&self) -> BackendPlatform;
}
