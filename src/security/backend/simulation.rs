/*!
 * Simulation Syscall Backend
 * Records every call and replays injected failures; no real syscalls
 */

use super::traits::*;
use super::types::*;
use crate::core::types::{Gid, Uid};
use ahash::RandomState;
use dashmap::{DashMap, DashSet};
use log::info;
use nix::errno::Errno;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// Operation kinds failures can be injected for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimulatedOp {
    Mount,
    Propagation,
    Umount,
    Symlink,
    CreateDir,
    Unshare,
    Chroot,
    PivotRoot,
    Dec,
}

/// Simulation-based backend
///
/// Paths exist unless marked missing. A propagation-only mount succeeds only
/// on targets that were mounted before, mirroring the kernel's `EINVAL`.
#[derive(Clone)]
pub struct SimulationBackend {
    calls: Arc<Mutex<Vec<BackendCall>>>,
    failures: Arc<DashMap<(SimulatedOp, String), i32, RandomState>>,
    missing: Arc<DashSet<String, RandomState>>,
    mounted: Arc<DashSet<String, RandomState>>,
    directories: Arc<DashMap<String, Vec<String>, RandomState>>,
    mount_table: Arc<Mutex<String>>,
    clock: Arc<AtomicU64>,
    next_fd: Arc<AtomicI32>,
}

impl SimulationBackend {
    pub fn new() -> Self {
        info!("Syscall backend initialized (simulation mode)");
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(DashMap::with_hasher(RandomState::new())),
            missing: Arc::new(DashSet::with_hasher(RandomState::new())),
            mounted: Arc::new(DashSet::with_hasher(RandomState::new())),
            directories: Arc::new(DashMap::with_hasher(RandomState::new())),
            mount_table: Arc::new(Mutex::new(String::new())),
            clock: Arc::new(AtomicU64::new(1_000_000_000)),
            next_fd: Arc::new(AtomicI32::new(100)),
        }
    }

    /// Fail `op` on `path` with `errno`; `"*"` matches every path
    pub fn fail_on(&self, op: SimulatedOp, path: &str, errno: Errno) {
        self.failures.insert((op, path.to_string()), errno as i32);
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Make `exists` report false for this path
    pub fn mark_missing(&self, path: &str) {
        self.missing.insert(path.to_string());
    }

    /// Pretend `path` is already a mount point
    pub fn mark_mounted(&self, path: &str) {
        self.mounted.insert(path.to_string());
    }

    /// Provide directory contents for `read_dir`
    pub fn set_directory(&self, path: &str, entries: &[&str]) {
        self.directories
            .insert(path.to_string(), entries.iter().map(|e| e.to_string()).collect());
    }

    pub fn set_mount_table(&self, table: &str) {
        *self.mount_table.lock() = table.to_string();
    }

    /// Snapshot of every recorded call, in order
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Recorded mount calls only
    pub fn mounts(&self) -> Vec<MountRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::Mount(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded DEC requests only
    pub fn dec_requests(&self) -> Vec<(DecCommand, DecRequest)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::Dec { command, request } => Some((*command, request.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }

    fn check(&self, op: SimulatedOp, path: &str, name: &str) -> BackendResult<()> {
        let injected = self
            .failures
            .get(&(op, path.to_string()))
            .or_else(|| self.failures.get(&(op, "*".to_string())))
            .map(|errno| *errno);
        match injected {
            Some(errno) => Err(BackendError::syscall(name, path, errno)),
            None => Ok(()),
        }
    }
}

impl Default for SimulationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyscallBackend for SimulationBackend {
    fn mount(&self, request: &MountRequest) -> BackendResult<()> {
        self.record(BackendCall::Mount(request.clone()));
        if request.source.is_none() && request.fs_type.is_none() {
            self.check(SimulatedOp::Propagation, &request.target, "mount")?;
            if request.flags.contains(MountFlags::SHARED) && !self.mounted.contains(&request.target) {
                return Err(BackendError::syscall("mount", &request.target, Errno::EINVAL as i32));
            }
            return Ok(());
        }
        self.check(SimulatedOp::Mount, &request.target, "mount")?;
        if let Some(source) = &request.source {
            self.check(SimulatedOp::Mount, source, "mount")?;
        }
        self.mounted.insert(request.target.clone());
        Ok(())
    }

    fn umount(&self, target: &str, detach: bool) -> BackendResult<()> {
        self.record(BackendCall::Umount {
            target: target.to_string(),
            detach,
        });
        self.check(SimulatedOp::Umount, target, "umount2")?;
        if self.mounted.remove(target).is_none() {
            return Err(BackendError::syscall("umount2", target, Errno::EINVAL as i32));
        }
        Ok(())
    }

    fn symlink(&self, target: &str, link: &str) -> BackendResult<()> {
        self.record(BackendCall::Symlink {
            target: target.to_string(),
            link: link.to_string(),
        });
        self.check(SimulatedOp::Symlink, link, "symlink")
    }

    fn create_dir_all(&self, path: &str, mode: u32) -> BackendResult<()> {
        self.record(BackendCall::CreateDir {
            path: path.to_string(),
            mode,
        });
        self.check(SimulatedOp::CreateDir, path, "mkdir")?;
        self.missing.remove(path);
        Ok(())
    }

    fn create_file(&self, path: &str) -> BackendResult<()> {
        self.record(BackendCall::CreateFile {
            path: path.to_string(),
        });
        self.missing.remove(path);
        Ok(())
    }

    fn remove_dir(&self, path: &str) -> BackendResult<()> {
        self.record(BackendCall::RemoveDir {
            path: path.to_string(),
        });
        self.missing.insert(path.to_string());
        Ok(())
    }

    fn read_dir(&self, path: &str) -> BackendResult<Vec<String>> {
        self.directories
            .get(path)
            .map(|entries| entries.clone())
            .ok_or_else(|| BackendError::syscall("opendir", path, Errno::ENOENT as i32))
    }

    fn exists(&self, path: &str) -> bool {
        !self.missing.contains(path)
    }

    fn chmod(&self, path: &str, mode: u32) -> BackendResult<()> {
        self.record(BackendCall::Chmod {
            path: path.to_string(),
            mode,
        });
        Ok(())
    }

    fn chown(&self, path: &str, uid: Uid, gid: Gid) -> BackendResult<()> {
        self.record(BackendCall::Chown {
            path: path.to_string(),
            uid,
            gid,
        });
        Ok(())
    }

    fn unshare(&self, flags: NamespaceFlags) -> BackendResult<()> {
        self.record(BackendCall::Unshare(flags));
        self.check(SimulatedOp::Unshare, "*", "unshare")
    }

    fn loopback_up(&self) -> BackendResult<()> {
        self.record(BackendCall::LoopbackUp);
        Ok(())
    }

    fn chdir(&self, path: &str) -> BackendResult<()> {
        self.record(BackendCall::Chdir {
            path: path.to_string(),
        });
        Ok(())
    }

    fn chroot(&self, path: &str) -> BackendResult<()> {
        self.record(BackendCall::Chroot {
            path: path.to_string(),
        });
        self.check(SimulatedOp::Chroot, path, "chroot")
    }

    fn pivot_root(&self, new_root: &str, put_old: &str) -> BackendResult<()> {
        self.record(BackendCall::PivotRoot {
            new_root: new_root.to_string(),
            put_old: put_old.to_string(),
        });
        self.check(SimulatedOp::PivotRoot, new_root, "pivot_root")?;
        // The old root stays stacked on the new one until detached
        self.mounted.insert(".".to_string());
        Ok(())
    }

    fn open_fuse(&self) -> BackendResult<i32> {
        self.record(BackendCall::OpenFuse);
        Ok(self.next_fd.fetch_add(1, Ordering::Relaxed))
    }

    fn mount_table(&self) -> BackendResult<String> {
        Ok(self.mount_table.lock().clone())
    }

    fn dec_control(&self, command: DecCommand, request: &DecRequest) -> BackendResult<()> {
        self.record(BackendCall::Dec {
            command,
            request: request.clone(),
        });
        self.check(SimulatedOp::Dec, "*", "ioctl")
    }

    fn monotonic_nanos(&self) -> u64 {
        self.clock.fetch_add(1_000, Ordering::Relaxed)
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn platform(&self) -> BackendPlatform {
        BackendPlatform::Simulation
    }
}
