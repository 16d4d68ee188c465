/*!
 * Syscall Backend Manager
 * Platform-aware selection between real syscalls and the recording simulation
 */

#[cfg(target_os = "linux")]
use super::linux::LinuxBackend;
use super::simulation::SimulationBackend;
use super::traits::*;
use super::types::*;
use crate::core::types::{Gid, Uid};
use log::info;

/// Unified backend that selects the appropriate platform implementation
#[derive(Clone)]
pub struct BackendManager {
    provider: BackendProviderImpl,
}

/// Platform-specific provider implementations
#[derive(Clone)]
enum BackendProviderImpl {
    #[cfg(target_os = "linux")]
    Linux(LinuxBackend),
    Simulation(SimulationBackend),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $call:expr) => {
        match &$self.provider {
            #[cfg(target_os = "linux")]
            BackendProviderImpl::Linux($m) => $call,
            BackendProviderImpl::Simulation($m) => $call,
        }
    };
}

impl BackendManager {
    /// Create a backend, auto-detecting the best implementation
    pub fn new() -> Self {
        let provider = Self::select_provider();
        let platform_name = match &provider {
            #[cfg(target_os = "linux")]
            BackendProviderImpl::Linux(_) => "Linux (nix syscalls)",
            BackendProviderImpl::Simulation(_) => "Simulation",
        };
        info!("Syscall backend manager initialized using: {}", platform_name);
        Self { provider }
    }

    /// Select the best available provider for the current platform
    fn select_provider() -> BackendProviderImpl {
        #[cfg(target_os = "linux")]
        {
            let linux = LinuxBackend::new();
            if linux.is_supported() {
                return BackendProviderImpl::Linux(linux);
            }
        }

        BackendProviderImpl::Simulation(SimulationBackend::new())
    }

    /// Wrap a simulation backend; the caller keeps a clone to inspect calls
    pub fn simulation(backend: SimulationBackend) -> Self {
        Self {
            provider: BackendProviderImpl::Simulation(backend),
        }
    }

    /// Whether real syscalls are issued
    pub fn is_live(&self) -> bool {
        self.platform() == BackendPlatform::Linux
    }
}

impl Default for BackendManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SyscallBackend for BackendManager {
    fn mount(&self, request: &MountRequest) -> BackendResult<()> {
        dispatch!(self, b => b.mount(request))
    }

    fn umount(&self, target: &str, detach: bool) -> BackendResult<()> {
        dispatch!(self, b => b.umount(target, detach))
    }

    fn symlink(&self, target: &str, link: &str) -> BackendResult<()> {
        dispatch!(self, b => b.symlink(target, link))
    }

    fn create_dir_all(&self, path: &str, mode: u32) -> BackendResult<()> {
        dispatch!(self, b => b.create_dir_all(path, mode))
    }

    fn create_file(&self, path: &str) -> BackendResult<()> {
        dispatch!(self, b => b.create_file(path))
    }

    fn remove_dir(&self, path: &str) -> BackendResult<()> {
        dispatch!(self, b => b.remove_dir(path))
    }

    fn read_dir(&self, path: &str) -> BackendResult<Vec<String>> {
        dispatch!(self, b => b.read_dir(path))
    }

    fn exists(&self, path: &str) -> bool {
        dispatch!(self, b => b.exists(path))
    }

    fn chmod(&self, path: &str, mode: u32) -> BackendResult<()> {
        dispatch!(self, b => b.chmod(path, mode))
    }

    fn chown(&self, path: &str, uid: Uid, gid: Gid) -> BackendResult<()> {
        dispatch!(self, b => b.chown(path, uid, gid))
    }

    fn unshare(&self, flags: NamespaceFlags) -> BackendResult<()> {
        dispatch!(self, b => b.unshare(flags))
    }

    fn loopback_up(&self) -> BackendResult<()> {
        dispatch!(self, b => b.loopback_up())
    }

    fn chdir(&self, path: &str) -> BackendResult<()> {
        dispatch!(self, b => b.chdir(path))
    }

    fn chroot(&self, path: &str) -> BackendResult<()> {
        dispatch!(self, b => b.chroot(path))
    }

    fn pivot_root(&self, new_root: &str, put_old: &str) -> BackendResult<()> {
        dispatch!(self, b => b.pivot_root(new_root, put_old))
    }

    fn open_fuse(&self) -> BackendResult<i32> {
        dispatch!(self, b => b.open_fuse())
    }

    fn mount_table(&self) -> BackendResult<String> {
        dispatch!(self, b => b.mount_table())
    }

    fn dec_control(&self, command: DecCommand, request: &DecRequest) -> BackendResult<()> {
        dispatch!(self, b => b.dec_control(command, request))
    }

    fn monotonic_nanos(&self) -> u64 {
        dispatch!(self, b => b.monotonic_nanos())
    }

    fn is_supported(&self) -> bool {
        dispatch!(self, b => b.is_supported())
    }

    fn platform(&self) -> BackendPlatform {
        dispatch!(self, b => b.platform())
    }
}
