/*!
 * Mount Executor
 * Performs resolved mounts and symlinks through the syscall backend
 */

use super::types::{ExecMode, MountOp, SymlinkOp};
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::{SANDBOX_DIR_MODE, SINGLE_FILE_TARGETS};
use crate::monitoring::MountTimer;
use crate::security::backend::{BackendError, MountRequest, SyscallBackend};
use log::{debug, info, warn};
use nix::errno::Errno;
use std::path::Path;

/// Executes mount and symlink operations for one spawn
pub struct MountExecutor<'a> {
    backend: &'a dyn SyscallBackend,
    mode: ExecMode,
    /// User storage el3..el5 is available
    unlocked: bool,
}

impl<'a> MountExecutor<'a> {
    pub fn new(backend: &'a dyn SyscallBackend, mode: ExecMode, unlocked: bool) -> Self {
        Self {
            backend,
            mode,
            unlocked,
        }
    }

    /// Executor whose failures are logged and swallowed
    pub fn no_check(backend: &'a dyn SyscallBackend) -> Self {
        Self::new(backend, ExecMode::NoCheck, false)
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn backend(&self) -> &'a dyn SyscallBackend {
        self.backend
    }

    /// Create the target, mount, then set propagation
    ///
    /// Empty source or target is a successful no-op.
    pub fn mount_once(&self, op: &MountOp) -> SandboxResult<()> {
        if op.is_empty() {
            return Ok(());
        }
        match self.try_mount(op) {
            Ok(()) => Ok(()),
            Err(e) if self.mode == ExecMode::NoCheck => {
                debug!("Ignoring mount failure of {} on {}: {}", op.source, op.target, e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_mount(&self, op: &MountOp) -> Result<(), BackendError> {
        self.prepare_target(&op.source, &op.target);

        debug!(
            "Bind mount {} to {} fs {:?} flags {} options {:?}",
            op.source, op.target, op.fs_type, op.flags, op.options
        );
        let timer = MountTimer::start(&op.target);
        let mounted = self.backend.mount(&op.request());
        timer.finish();

        if let Err(e) = mounted {
            warn!("errno {:?} bind mount {} to {}", e.errno(), op.source, op.target);
            if e.is_errno(Errno::ENOENT) && self.needs_source_check(&op.source) {
                self.verify_source(&op.source);
            }
            return Err(e);
        }

        let propagation = MountRequest::propagation(&op.target, op.propagation.flags());
        if let Err(e) = self.backend.mount(&propagation) {
            warn!(
                "errno {:?} setting {} propagation on {}",
                e.errno(),
                op.propagation.flags(),
                op.target
            );
            if e.is_errno(Errno::EINVAL) && self.mode == ExecMode::Checked {
                self.scan_mount_table(&op.target);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Files for the single-file allowlist, directories for everything else
    fn prepare_target(&self, source: &str, target: &str) {
        let created = if SINGLE_FILE_TARGETS.iter().any(|f| source.contains(f)) {
            self.backend.create_file(target)
        } else {
            self.backend.create_dir_all(target, SANDBOX_DIR_MODE)
        };
        if let Err(e) = created {
            debug!("Could not create mount target {}: {}", target, e);
        }
    }

    fn needs_source_check(&self, source: &str) -> bool {
        if source.contains("data/app/el1/") || source.contains("data/app/el2/") {
            return true;
        }
        self.unlocked
            && ["data/app/el3/", "data/app/el4/", "data/app/el5/"]
                .iter()
                .any(|p| source.contains(p))
    }

    /// Log the first missing component of a source path
    fn verify_source(&self, source: &str) {
        let mut prefix = String::new();
        for component in Path::new(source).components().skip(1) {
            prefix.push('/');
            prefix.push_str(&component.as_os_str().to_string_lossy());
            if !self.backend.exists(&prefix) {
                warn!("Mount source {} missing at {}", source, prefix);
                return;
            }
        }
        info!("Mount source {} exists", source);
    }

    /// Log mount table lines mentioning the target
    fn scan_mount_table(&self, target: &str) {
        match self.backend.mount_table() {
            Ok(table) => {
                let mut found = false;
                for line in table.lines().filter(|l| l.contains(target)) {
                    found = true;
                    info!("Current mountinfo {}", line);
                }
                if !found {
                    warn!("Mountinfo does not contain {}", target);
                }
            }
            Err(e) => warn!("Failed to read mount table: {}", e),
        }
    }

    /// Create a symlink; an existing link is success
    pub fn symlink_once(&self, op: &SymlinkOp) -> SandboxResult<()> {
        if op.target.is_empty() || op.link.is_empty() {
            return Ok(());
        }
        match self.backend.symlink(&op.target, &op.link) {
            Ok(()) => Ok(()),
            Err(e) if e.is_errno(Errno::EEXIST) => Ok(()),
            Err(e) if op.check_action_status && self.mode == ExecMode::Checked => {
                warn!("symlink {} -> {} failed: {}", op.link, op.target, e);
                Err(SandboxError::from(e))
            }
            Err(e) => {
                debug!("symlink {} -> {} failed, ignored: {}", op.link, op.target, e);
                Ok(())
            }
        }
    }

    /// Apply a `dest-mode` to a created path
    pub fn chmod(&self, path: &str, mode: u32) -> SandboxResult<()> {
        match self.backend.chmod(path, mode) {
            Ok(()) => Ok(()),
            Err(e) if self.mode == ExecMode::NoCheck => {
                debug!("chmod {} ignored: {}", path, e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
