/*!
 * Linux Syscall Backend
 * Real mount, namespace and DEC device operations through nix
 */

use super::traits::*;
use super::types::*;
use crate::core::limits::{DEC_DEVICE, DEC_POLICY_HEADER_RESERVED, FUSE_DEVICE, MAX_POLICY_NUM};
use crate::core::types::{Gid, Uid};
use log::{debug, info};
use nix::errno::Errno;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{unshare, CloneFlags};
use std::ffi::CString;
use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::path::Path;

// ============================================================================
// Kernel ABI
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy)]
struct DecPathInfo {
    path: *const nix::libc::c_char,
    path_len: u32,
    mode: u32,
    flag: bool,
}

impl DecPathInfo {
    const EMPTY: Self = Self {
        path: std::ptr::null(),
        path_len: 0,
        mode: 0,
        flag: false,
    };
}

#[repr(C)]
struct DecPolicyInfo {
    token_id: u64,
    timestamp: u64,
    path: [DecPathInfo; MAX_POLICY_NUM],
    path_num: u32,
    user_id: i32,
    reserved: [u64; DEC_POLICY_HEADER_RESERVED],
    flag: bool,
}

nix::ioctl_readwrite!(dec_set_policy, b's', 1, DecPolicyInfo);
nix::ioctl_readwrite!(dec_del_policy, b's', 2, DecPolicyInfo);
nix::ioctl_readwrite!(dec_check_policy, b's', 4, DecPolicyInfo);
nix::ioctl_write_ptr!(dec_constraint_policy, b's', 6, DecPolicyInfo);
nix::ioctl_readwrite!(dec_deny_policy, b's', 7, DecPolicyInfo);
nix::ioctl_readwrite!(dec_set_prefix, b's', 8, DecPolicyInfo);

nix::ioctl_read_bad!(get_if_flags, nix::libc::SIOCGIFFLAGS, nix::libc::ifreq);
nix::ioctl_write_ptr_bad!(set_if_flags, nix::libc::SIOCSIFFLAGS, nix::libc::ifreq);

fn errno_of(err: &std::io::Error) -> i32 {
    err.raw_os_error().unwrap_or(Errno::EIO as i32)
}

fn io_err(op: &str, path: &str, err: std::io::Error) -> BackendError {
    BackendError::syscall(op, path, errno_of(&err))
}

fn nix_err(op: &str, path: &str, err: Errno) -> BackendError {
    BackendError::syscall(op, path, err as i32)
}

fn ms_flags(flags: MountFlags) -> MsFlags {
    MsFlags::from_bits_truncate(flags.bits() as nix::libc::c_ulong)
}

/// Linux backend performing real syscalls
#[derive(Debug, Clone, Default)]
pub struct LinuxBackend;

impl LinuxBackend {
    pub fn new() -> Self {
        info!("Linux syscall backend initialized");
        Self
    }
}

impl SyscallBackend for LinuxBackend {
    fn mount(&self, request: &MountRequest) -> BackendResult<()> {
        mount(
            request.source.as_deref(),
            request.target.as_str(),
            request.fs_type.as_deref(),
            ms_flags(request.flags),
            request.data.as_deref(),
        )
        .map_err(|e| nix_err("mount", &request.target, e))
    }

    fn umount(&self, target: &str, detach: bool) -> BackendResult<()> {
        let flags = if detach {
            MntFlags::MNT_DETACH
        } else {
            MntFlags::empty()
        };
        umount2(target, flags).map_err(|e| nix_err("umount2", target, e))
    }

    fn symlink(&self, target: &str, link: &str) -> BackendResult<()> {
        std::os::unix::fs::symlink(target, link).map_err(|e| io_err("symlink", link, e))
    }

    fn create_dir_all(&self, path: &str, mode: u32) -> BackendResult<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
            .map_err(|e| io_err("mkdir", path, e))
    }

    fn create_file(&self, path: &str) -> BackendResult<()> {
        if Path::new(path).exists() {
            return Ok(());
        }
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent).map_err(|e| io_err("mkdir", path, e))?;
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map(|_| ())
            .map_err(|e| io_err("create", path, e))
    }

    fn remove_dir(&self, path: &str) -> BackendResult<()> {
        fs::remove_dir(path).map_err(|e| io_err("rmdir", path, e))
    }

    fn read_dir(&self, path: &str) -> BackendResult<Vec<String>> {
        let entries = fs::read_dir(path).map_err(|e| io_err("opendir", path, e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn chmod(&self, path: &str, mode: u32) -> BackendResult<()> {
        fs::set_permissions(path, Permissions::from_mode(mode)).map_err(|e| io_err("chmod", path, e))
    }

    fn chown(&self, path: &str, uid: Uid, gid: Gid) -> BackendResult<()> {
        nix::unistd::chown(
            path,
            Some(nix::unistd::Uid::from_raw(uid)),
            Some(nix::unistd::Gid::from_raw(gid)),
        )
        .map_err(|e| nix_err("chown", path, e))
    }

    fn unshare(&self, flags: NamespaceFlags) -> BackendResult<()> {
        let mut clone_flags = CloneFlags::CLONE_NEWNS;
        if flags.pid {
            clone_flags |= CloneFlags::CLONE_NEWPID;
        }
        if flags.net {
            clone_flags |= CloneFlags::CLONE_NEWNET;
        }
        debug!("unshare {:?}", clone_flags);
        unshare(clone_flags).map_err(|e| nix_err("unshare", "-", e))
    }

    fn loopback_up(&self) -> BackendResult<()> {
        use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};

        let sock = socket(
            AddressFamily::Inet,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| nix_err("socket", "lo", e))?;

        // SAFETY: ifreq is plain old data; an all-zero value is valid
        let mut ifr: nix::libc::ifreq = unsafe { std::mem::zeroed() };
        for (dst, src) in ifr.ifr_name.iter_mut().zip(b"lo\0".iter()) {
            *dst = *src as nix::libc::c_char;
        }

        // SAFETY: fd is a live socket and ifr outlives both calls
        unsafe {
            get_if_flags(sock.as_raw_fd(), &mut ifr).map_err(|e| nix_err("SIOCGIFFLAGS", "lo", e))?;
            ifr.ifr_ifru.ifru_flags |= nix::libc::IFF_UP as nix::libc::c_short;
            set_if_flags(sock.as_raw_fd(), &ifr).map_err(|e| nix_err("SIOCSIFFLAGS", "lo", e))?;
        }
        Ok(())
    }

    fn chdir(&self, path: &str) -> BackendResult<()> {
        nix::unistd::chdir(path).map_err(|e| nix_err("chdir", path, e))
    }

    fn chroot(&self, path: &str) -> BackendResult<()> {
        nix::unistd::chroot(path).map_err(|e| nix_err("chroot", path, e))
    }

    fn pivot_root(&self, new_root: &str, put_old: &str) -> BackendResult<()> {
        nix::unistd::pivot_root(new_root, put_old).map_err(|e| nix_err("pivot_root", new_root, e))
    }

    fn open_fuse(&self) -> BackendResult<i32> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(FUSE_DEVICE)
            .map_err(|e| io_err("open", FUSE_DEVICE, e))?;
        Ok(file.into_raw_fd())
    }

    fn mount_table(&self) -> BackendResult<String> {
        fs::read_to_string("/proc/self/mountinfo").map_err(|e| io_err("read", "/proc/self/mountinfo", e))
    }

    fn dec_control(&self, command: DecCommand, request: &DecRequest) -> BackendResult<()> {
        if request.paths.len() > MAX_POLICY_NUM {
            return Err(BackendError::InvalidArgument(format!(
                "{} paths exceed the DEC request capacity",
                request.paths.len()
            )));
        }

        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(DEC_DEVICE)
            .map_err(|e| io_err("open", DEC_DEVICE, e))?;

        let c_paths = request
            .paths
            .iter()
            .map(|entry| {
                CString::new(entry.path.as_str())
                    .map_err(|_| BackendError::InvalidArgument(format!("NUL in path {}", entry.path)))
            })
            .collect::<BackendResult<Vec<CString>>>()?;

        let mut info = DecPolicyInfo {
            token_id: request.token_id,
            timestamp: request.timestamp,
            path: [DecPathInfo::EMPTY; MAX_POLICY_NUM],
            path_num: request.paths.len() as u32,
            user_id: request.user_id,
            reserved: [0; DEC_POLICY_HEADER_RESERVED],
            flag: request.flag,
        };
        for (slot, (entry, c_path)) in info.path.iter_mut().zip(request.paths.iter().zip(&c_paths)) {
            *slot = DecPathInfo {
                path: c_path.as_ptr(),
                path_len: entry.path.len() as u32,
                mode: entry.mode,
                flag: false,
            };
        }

        let fd = device.as_raw_fd();
        // SAFETY: info and the CStrings it points into live across the call
        let result = unsafe {
            match command {
                DecCommand::SetPolicy => dec_set_policy(fd, &mut info),
                DecCommand::DeletePolicy => dec_del_policy(fd, &mut info),
                DecCommand::CheckPolicy => dec_check_policy(fd, &mut info),
                DecCommand::ConstraintPolicy => dec_constraint_policy(fd, &info),
                DecCommand::DenyPolicy => dec_deny_policy(fd, &mut info),
                DecCommand::SetPrefix => dec_set_prefix(fd, &mut info),
            }
        };
        result
            .map(|_| ())
            .map_err(|e| nix_err("ioctl", DEC_DEVICE, e))
    }

    fn monotonic_nanos(&self) -> u64 {
        use nix::time::{clock_gettime, ClockId};
        clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map(|ts| (ts.tv_sec() as u64) * 1_000_000_000 + ts.tv_nsec() as u64)
            .unwrap_or(0)
    }

    fn is_supported(&self) -> bool {
        Path::new("/proc/self/mountinfo").exists()
    }

    fn platform(&self) -> BackendPlatform {
        BackendPlatform::Linux
    }
}
