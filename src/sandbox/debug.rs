/*!
 * Debug Sandbox
 * Developer-mode hap directories exported through sharefs
 */

use crate::core::errors::SandboxResult;
use crate::core::limits::{
    DEBUG_PROVISION_TYPE, DEBUG_SHAREFS_TYPE, DEBUG_SHARE_PREFIX, DEBUG_SHARE_ROOT,
    DEBUG_TMP_PREFIX, DEBUG_TMP_ROOT, SANDBOX_DIR_MODE,
};
use crate::core::types::{AppFlag, UserId};
use crate::permissions::Grants;
use crate::policy::{PolicyDocument, SandboxSection};
use crate::sandbox::executor::MountExecutor;
use crate::sandbox::planner::{evaluate, Evaluation, SectionKind, SectionScope};
use crate::sandbox::resolver::{ParamCache, PathResolver};
use crate::security::backend::{MountFlags, MountRequest, SyscallBackend};
use log::{debug, info, warn};
use std::sync::Arc;

/// Whether the identity gets a debug sandbox at all
pub fn debug_enabled(resolver: &PathResolver<'_>, developer_mode: bool) -> bool {
    let identity = resolver.identity();
    let developer = developer_mode || identity.has_flag(AppFlag::DeveloperMode);
    developer && identity.provision_type.as_deref() == Some(DEBUG_PROVISION_TYPE)
}

/// Resolve a debug root; atomic services use the plain bundle name
fn debug_root(resolver: &PathResolver<'_>, template: &str) -> String {
    let identity = resolver.identity();
    if identity.is_atomic_service() {
        resolver.resolve(&template.replace("<variablePackageName>", &identity.bundle_name))
    } else {
        resolver.resolve(template)
    }
}

/// Installs and removes debug hap mounts
pub struct DebugSandbox<'a> {
    backend: &'a dyn SyscallBackend,
}

impl<'a> DebugSandbox<'a> {
    pub fn new(backend: &'a dyn SyscallBackend) -> Self {
        Self { backend }
    }

    /// Mount the debug sections and export them; returns the mount count
    pub fn install(
        &self,
        resolver: &PathResolver<'_>,
        params: &ParamCache,
        grants: &Grants<'_>,
        documents: &[Arc<PolicyDocument>],
        developer_mode: bool,
    ) -> SandboxResult<usize> {
        let identity = resolver.identity();
        if !debug_enabled(resolver, developer_mode) {
            debug!("No debug sandbox for {}", identity.bundle_name);
            return Ok(0);
        }
        let tmp_root = debug_root(resolver, DEBUG_TMP_ROOT);
        let share_root = debug_root(resolver, DEBUG_SHARE_ROOT);
        if tmp_root.is_empty() || share_root.is_empty() {
            warn!("Debug roots unresolved for {}", identity.bundle_name);
            return Ok(0);
        }

        let executor = MountExecutor::no_check(self.backend);
        let scope = SectionScope::new(SectionKind::Debug, tmp_root.clone());
        let mut mounted = 0;
        for document in documents {
            if let Some(common) = document.debug_common() {
                mounted += self.apply(common, &scope, resolver, params, &executor);
            }
            for (name, section) in document.debug_permissions() {
                if grants.has(name) {
                    mounted += self.apply(section, &scope, resolver, params, &executor);
                }
            }
        }

        self.export(&tmp_root, &share_root, identity.user_id())?;
        info!("Debug sandbox for {}: {} mounts", identity.bundle_name, mounted);
        Ok(mounted)
    }

    fn apply(
        &self,
        section: &SandboxSection,
        scope: &SectionScope,
        resolver: &PathResolver<'_>,
        params: &ParamCache,
        executor: &MountExecutor<'_>,
    ) -> usize {
        let atomic = resolver.identity().is_atomic_service();
        let mut mounted = 0;
        for entry in &section.mount_paths {
            let Evaluation::Mount(resolved) = evaluate(entry, scope, resolver, params, self.backend)
            else {
                continue;
            };
            let target = &resolved.op.target;
            if self.backend.exists(target) {
                if !atomic {
                    debug!("Debug path {} already present", target);
                    continue;
                }
                if let Err(e) = self.backend.umount(target, true) {
                    debug!("Detaching stale {} failed: {}", target, e);
                }
            }
            if executor.mount_once(&resolved.op).is_ok() {
                mounted += 1;
            }
        }
        mounted
    }

    /// Export the tmp tree through sharefs unless it already is
    fn export(&self, tmp_root: &str, share_root: &str, user: UserId) -> SandboxResult<()> {
        if self.backend.exists(&format!("{}/data", share_root)) {
            debug!("{} already exported", share_root);
            return Ok(());
        }
        if let Err(e) = self.backend.create_dir_all(share_root, SANDBOX_DIR_MODE) {
            warn!("Failed to create {}: {}", share_root, e);
        }
        let options = format!("override_support_delete,user_id={}", user);
        let request = MountRequest::bind(tmp_root, share_root, MountFlags::NODEV)
            .with_fs_type(DEBUG_SHAREFS_TYPE)
            .with_data(&options);
        self.backend.mount(&request)?;
        self.backend
            .mount(&MountRequest::propagation(share_root, MountFlags::SHARED))?;
        Ok(())
    }

    /// Detach and remove every debug hap directory of a user
    ///
    /// Returns the number of directories removed.
    pub fn uninstall(&self, user: UserId, documents: &[Arc<PolicyDocument>]) -> usize {
        let tmp_base = format!("{}{}/debug_hap", DEBUG_TMP_PREFIX, user);
        let share_base = format!("{}{}/debug_hap", DEBUG_SHARE_PREFIX, user);
        let mut removed = 0;

        let sandbox_paths: Vec<&str> = documents
            .iter()
            .flat_map(|d| {
                d.debug_common()
                    .into_iter()
                    .chain(d.debug_permissions().map(|(_, s)| s))
            })
            .flat_map(|s| s.mount_paths.iter())
            .filter_map(|m| m.sandbox_path.as_deref())
            .filter(|p| !p.contains('<'))
            .collect();

        for package in self.list(&tmp_base) {
            for path in &sandbox_paths {
                let full = format!("{}/{}{}", tmp_base, package, path);
                if self.backend.exists(&full) {
                    removed += self.detach_and_remove(&full);
                }
            }
        }
        for package in self.list(&share_base) {
            removed += self.detach_and_remove(&format!("{}/{}", share_base, package));
        }
        info!("Removed {} debug directories of user {}", removed, user);
        removed
    }

    fn list(&self, dir: &str) -> Vec<String> {
        match self.backend.read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Nothing to uninstall under {}: {}", dir, e);
                Vec::new()
            }
        }
    }

    fn detach_and_remove(&self, path: &str) -> usize {
        if let Err(e) = self.backend.umount(path, true) {
            debug!("umount {} failed: {}", path, e);
        }
        match self.backend.remove_dir(path) {
            Ok(()) => 1,
            Err(e) => {
                warn!("Failed to remove {}: {}", path, e);
                0
            }
        }
    }
}
