/*!
 * Special Mount Strategies
 * DLP fuse mounts, atomic-service directories, flag gating and flag updates
 */

use crate::core::errors::SandboxResult;
use crate::core::limits::{
    ALLOW_IOURING_PERMISSION, DDMS_GID, DLP_BUNDLE_NAME, DLP_FUSE_CONTEXT, DLP_FUSE_PATH,
    FILE_ACCESS_MANAGER_PERMISSION, GET_ALL_PROCESSES_PERMISSION, LOG_GID, PARAM_FULL_MOUNT_ENABLE,
};
use crate::core::types::AppFlag;
use crate::permissions::Grants;
use crate::sandbox::identity::AppIdentity;
use crate::sandbox::resolver::{ParamCache, PathResolver};
use crate::sandbox::types::MountOp;
use crate::security::backend::{MountFlags, MountRequest, SyscallBackend};
use log::{debug, info, warn};

/// Pre-install marker for preinstalled apps without a custom sandbox
pub const PREINSTALLED_HAP: &str = "PREINSTALLED_HAP";

/// Pre-install marker for preinstalled apps with a custom sandbox
pub const PREINSTALLED_SHELL_HAP: &str = "PREINSTALLED_SHELL_HAP";

// ============================================================================
// Flags
// ============================================================================

/// Whether a `flags-point` entry applies to the identity
pub fn flags_point_matches(token: &str, identity: &AppIdentity) -> bool {
    let preinstalled = identity.has_flag(AppFlag::PreInstalledHap);
    let custom = identity.has_flag(AppFlag::CustomSandbox);
    match token {
        PREINSTALLED_HAP => preinstalled && !custom,
        PREINSTALLED_SHELL_HAP => preinstalled && custom,
        other => AppFlag::from_token(other).is_some_and(|flag| identity.has_flag(flag)),
    }
}

/// Set the flags derived from granted permissions before planning
pub fn update_flags(identity: &mut AppIdentity, grants: &Grants<'_>, params: &ParamCache) {
    if !grants.has(FILE_ACCESS_MANAGER_PERMISSION) {
        let flag = if params.get_bool(PARAM_FULL_MOUNT_ENABLE) {
            AppFlag::FileCrossApp
        } else {
            AppFlag::FileAccessCommonDir
        };
        identity.msg_flags.insert(flag);
    }
    if grants.has(GET_ALL_PROCESSES_PERMISSION) {
        identity.msg_flags.insert(AppFlag::GetAllProcesses);
    }
    if grants.has(ALLOW_IOURING_PERMISSION) {
        identity.msg_flags.insert(AppFlag::AllowIouring);
    }
}

// ============================================================================
// DLP
// ============================================================================

/// The fuse strategy applies to the DLP manager's fuse path with an fs type
pub fn dlp_applies(identity: &AppIdentity, op: &MountOp) -> bool {
    identity.bundle_name.contains(DLP_BUNDLE_NAME)
        && op.target.ends_with(DLP_FUSE_PATH)
        && op.fs_type.as_deref().is_some_and(|t| !t.is_empty())
}

/// Replace the bind with a fuse mount carrying a fresh `/dev/fuse` descriptor
///
/// Returns the descriptor; the caller hands it to the DLP manager.
pub fn mount_dlp_fuse(
    backend: &dyn SyscallBackend,
    identity: &AppIdentity,
    op: &MountOp,
) -> SandboxResult<i32> {
    if let Err(e) = backend.umount(&op.target, true) {
        debug!("{} was not mounted: {}", op.target, e);
    }
    let fd = backend.open_fuse()?;
    let options = format!(
        "fd={},rootmode=40000,user_id={},group_id={},allow_other,context=\"{}\",fscontext={}",
        fd, identity.uid, identity.gid, DLP_FUSE_CONTEXT, DLP_FUSE_CONTEXT
    );
    if let Err(e) = backend.create_dir_all(&op.target, crate::core::limits::SANDBOX_DIR_MODE) {
        debug!("Could not create {}: {}", op.target, e);
    }

    let mut request = MountRequest::bind(&op.source, &op.target, op.flags).with_data(&options);
    if let Some(fs_type) = op.fs_type.as_deref() {
        request = request.with_fs_type(fs_type);
    }
    backend.mount(&request)?;
    backend.mount(&MountRequest::propagation(&op.target, MountFlags::SHARED))?;
    info!("DLP fuse mounted at {} with fd {}", op.target, fd);
    Ok(fd)
}

// ============================================================================
// Atomic service directories
// ============================================================================

/// Create an atomic-service data directory with its mode and owner
///
/// `/mnt/share` sources map to the el2 share directory. Existing
/// directories are left alone. Failures are logged.
pub fn ensure_atomic_service_dir(
    resolver: &PathResolver<'_>,
    backend: &dyn SyscallBackend,
    source: &str,
) {
    let identity = resolver.identity();
    let Some(var_name) = resolver.variable_package_name() else {
        return;
    };
    let path = if source.contains("/mnt/share") {
        format!("/data/service/el2/{}/share/{}", identity.user_id(), var_name)
    } else {
        source.to_string()
    };
    if backend.exists(&path) {
        return;
    }
    if let Err(e) = backend.create_dir_all(&path, 0o700) {
        warn!("Failed to create atomic service dir {}: {}", path, e);
        return;
    }

    let mode = if path.contains("/database") || path.contains("/data/service/el2") {
        Some(0o2770)
    } else if path.contains("/log") {
        Some(0o770)
    } else {
        None
    };
    if let Some(mode) = mode {
        if let Err(e) = backend.chmod(&path, mode) {
            warn!("Failed to chmod {}: {}", path, e);
            return;
        }
    }

    let owner = if path.contains("/base") || path.contains("/data/service/el2") {
        Some(identity.gid)
    } else if path.contains("/database") {
        Some(DDMS_GID)
    } else if path.contains("/log") {
        Some(LOG_GID)
    } else {
        None
    };
    if let Some(gid) = owner {
        if let Err(e) = backend.chown(&path, identity.uid, gid) {
            warn!("Failed to chown {}: {}", path, e);
        }
    }
    debug!("Atomic service dir {} ready", path);
}
