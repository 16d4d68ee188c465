/*!
 * DEC Policy Manager
 * Bounded path access batches submitted to the kernel DEC device
 */

use super::identity::AppIdentity;
use super::resolver::PathResolver;
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::{
    DEC_CLONE_DOWNLOAD_DIR, DEC_CONSTRAINT_DIRS, DEC_FORCED_PREFIXES, DEC_MODE_DENY_INHERIT,
    DEC_MODE_READ, DEC_MODE_WRITE, MAX_POLICY_NUM, READ_WRITE_DESKTOP_PERMISSION,
    READ_WRITE_DOCUMENTS_PERMISSION, READ_WRITE_DOWNLOAD_PERMISSION,
    READ_WRITE_USER_FILE_PERMISSION,
};
use crate::permissions::Grants;
use crate::security::backend::{DecCommand, DecPathEntry, DecRequest, SyscallBackend};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Directories denied by inheritance unless the matching permission is held
const DENY_RULES: [(&str, &str); 3] = [
    (READ_WRITE_DOWNLOAD_PERMISSION, "/storage/Users/currentUser/Download"),
    (READ_WRITE_DESKTOP_PERMISSION, "/storage/Users/currentUser/Desktop"),
    (READ_WRITE_DOCUMENTS_PERMISSION, "/storage/Users/currentUser/Documents"),
];

/// Pending per-spawn DEC entries, capped at `MAX_POLICY_NUM`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecBatch {
    entries: Vec<DecPathEntry>,
}

impl DecBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append entries; overflowing the cap discards the whole batch
    pub fn accumulate(&mut self, entries: Vec<DecPathEntry>) -> SandboxResult<usize> {
        if entries.is_empty() {
            return Ok(self.entries.len());
        }
        let total = self.entries.len() + entries.len();
        if total > MAX_POLICY_NUM {
            warn!(
                "DEC batch of {} + {} exceeds {}, discarding",
                self.entries.len(),
                entries.len(),
                MAX_POLICY_NUM
            );
            self.entries.clear();
            return Err(SandboxError::ResourceExhausted(format!(
                "{} DEC paths exceed the batch capacity {}",
                total, MAX_POLICY_NUM
            )));
        }
        self.entries.extend(entries);
        Ok(self.entries.len())
    }

    pub fn entries(&self) -> &[DecPathEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Submits DEC policy through the syscall backend
pub struct DecPolicyManager {
    backend: Arc<dyn SyscallBackend>,
    started: AtomicBool,
}

impl DecPolicyManager {
    pub fn new(backend: Arc<dyn SyscallBackend>) -> Self {
        Self {
            backend,
            started: AtomicBool::new(false),
        }
    }

    /// Install the constraint dirs and forced prefixes once per service
    ///
    /// Returns false when startup already ran. Device failures are logged.
    pub fn startup(&self) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.issue_fixed(DecCommand::ConstraintPolicy, &DEC_CONSTRAINT_DIRS);
        self.issue_fixed(DecCommand::SetPrefix, &DEC_FORCED_PREFIXES);
        true
    }

    fn issue_fixed(&self, command: DecCommand, paths: &[&str]) {
        let request = DecRequest {
            token_id: 0,
            timestamp: 0,
            user_id: 0,
            flag: false,
            paths: paths
                .iter()
                .map(|p| DecPathEntry::new(*p, DEC_MODE_READ))
                .collect(),
        };
        match self.backend.dec_control(command, &request) {
            Ok(()) => info!("DEC {:?} installed for {} paths", command, paths.len()),
            Err(e) => warn!("DEC {:?} failed: {}", command, e),
        }
    }

    /// Submit the pending batch with a monotonic timestamp, then clear it
    ///
    /// Returns whether anything was sent. A device that cannot be reached
    /// is logged and the batch dropped.
    pub fn submit(&self, batch: &mut DecBatch, token_id: u64) -> bool {
        if batch.is_empty() {
            return false;
        }
        let timestamp = self.backend.monotonic_nanos();
        let request = DecRequest {
            token_id,
            timestamp,
            user_id: 0,
            flag: true,
            paths: std::mem::take(&mut batch.entries),
        };
        match self.backend.dec_control(DecCommand::SetPolicy, &request) {
            Ok(()) => {
                info!("DEC policy set, timestamp {}", timestamp);
                for entry in &request.paths {
                    debug!("DEC path {} mode {:#x}", entry.path, entry.mode);
                }
                true
            }
            Err(e) => {
                warn!("DEC policy submission failed: {}", e);
                false
            }
        }
    }
}

/// `dec-paths` of a mount point, read and write
pub fn permission_entries(paths: &[String]) -> Vec<DecPathEntry> {
    paths
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| DecPathEntry::new(p.clone(), DEC_MODE_READ | DEC_MODE_WRITE))
        .collect()
}

/// Download directory of the app instance, read and write
pub fn download_dir_entry(resolver: &PathResolver<'_>) -> Option<DecPathEntry> {
    let identity: &AppIdentity = resolver.identity();
    if !identity.is_resolvable() {
        return None;
    }
    let name = if identity.is_atomic_service() {
        identity.bundle_name.clone()
    } else if identity.is_clone() {
        format!("+clone-{}+{}", identity.bundle_index, identity.bundle_name)
    } else {
        identity.bundle_name.clone()
    };
    Some(DecPathEntry::new(
        format!("{}{}", DEC_CLONE_DOWNLOAD_DIR, name),
        DEC_MODE_READ | DEC_MODE_WRITE,
    ))
}

/// Deny-inherit rules for user directories the app has no explicit grant for
pub fn deny_entries(grants: &Grants<'_>) -> Vec<DecPathEntry> {
    if !grants.has(READ_WRITE_USER_FILE_PERMISSION) {
        debug!("No {} grant, no deny rules", READ_WRITE_USER_FILE_PERMISSION);
        return Vec::new();
    }
    DENY_RULES
        .iter()
        .filter(|(permission, _)| !grants.has(permission))
        .map(|(_, path)| DecPathEntry::new(*path, DEC_MODE_DENY_INHERIT))
        .collect()
}
