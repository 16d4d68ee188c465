/*!
 * Shared Mounts
 * Pre-fork shared storage mounts for locked users and the data group queues
 */

use super::executor::MountExecutor;
use super::identity::AppIdentity;
use super::resolver::{ParamCache, PathResolver};
use super::types::{ExecMode, MountOp};
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::{
    LOCKED_STAMP_SUFFIX, LOCK_STATUS_UNLOCKED, PARAM_LOCK_STATUS_PREFIX, SANDBOX_DIR_MODE,
    SANDBOX_ROOT_DIR, SHARED_STORAGE_DIRS,
};
use crate::core::types::UserId;
use crate::permissions::Grants;
use crate::security::backend::{MountFlags, MountRequest, Propagation, SyscallBackend};
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Data group queue
// ============================================================================

/// Queue lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Collecting,
    Drained,
}

/// Result of queueing a data group mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOutcome {
    Queued,
    /// Same (source, target) pair already queued
    DuplicateIgnored,
}

/// Data group mounts collected during planning, mounted once
///
/// The spawn keeps one for its child; the shared mount manager keeps one per
/// locked user until that user unlocks.
#[derive(Debug, Clone)]
pub struct DataGroupQueue {
    state: QueueState,
    entries: Vec<MountOp>,
    seen: HashSet<(String, String), RandomState>,
}

impl DataGroupQueue {
    pub fn new() -> Self {
        Self {
            state: QueueState::Collecting,
            entries: Vec::new(),
            seen: HashSet::with_hasher(RandomState::new()),
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MountOp] {
        &self.entries
    }

    pub fn push(&mut self, op: MountOp) -> SandboxResult<QueueOutcome> {
        if self.state == QueueState::Drained {
            return Err(SandboxError::InvalidState(format!(
                "data group {} queued after drain",
                op.target
            )));
        }
        if !self.seen.insert((op.source.clone(), op.target.clone())) {
            debug!("Data group {} -> {} already queued", op.source, op.target);
            return Ok(QueueOutcome::DuplicateIgnored);
        }
        self.entries.push(op);
        Ok(QueueOutcome::Queued)
    }

    /// Bind each entry recursively with the given propagation
    ///
    /// Individual failures are logged; returns the number mounted.
    pub fn drain(
        &mut self,
        executor: &MountExecutor<'_>,
        propagation: Propagation,
    ) -> SandboxResult<usize> {
        if self.state == QueueState::Drained {
            return Err(SandboxError::InvalidState("data group queue already drained".into()));
        }
        self.state = QueueState::Drained;

        let mut mounted = 0;
        for op in self.entries.drain(..) {
            let op = MountOp {
                flags: MountFlags::BIND | MountFlags::REC,
                propagation,
                ..op
            };
            match executor.mount_once(&op) {
                Ok(()) => mounted += 1,
                Err(e) => warn!("Data group mount {} -> {} failed: {}", op.source, op.target, e),
            }
        }
        info!("Mounted {} data groups", mounted);
        Ok(mounted)
    }
}

impl Default for DataGroupQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Shared mount manager
// ============================================================================

/// User storage state seen by the pre-fork phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Unlocked,
    Locked,
}

/// Shared mounts held for one (user, bundle)
#[derive(Debug, Clone, Default)]
struct SharedHolder {
    count: usize,
    paths: Vec<String>,
}

/// Reference-counted shared storage mounts made before fork
///
/// Also holds the data groups of locked users until `on_unlock`.
#[derive(Clone)]
pub struct SharedMountManager {
    backend: Arc<dyn SyscallBackend>,
    holders: Arc<DashMap<(UserId, String), SharedHolder, RandomState>>,
    pending: Arc<DashMap<UserId, DataGroupQueue, RandomState>>,
}

impl SharedMountManager {
    pub fn new(backend: Arc<dyn SyscallBackend>) -> Self {
        Self {
            backend,
            holders: Arc::new(DashMap::with_hasher(RandomState::new())),
            pending: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    /// User 0 is always unlocked; others read the lock status parameter
    pub fn lock_state(identity: &AppIdentity, params: &ParamCache) -> LockState {
        let user = identity.user_id();
        if user == 0 {
            return LockState::Unlocked;
        }
        let name = format!("{}{}", PARAM_LOCK_STATUS_PREFIX, user);
        match params.get(&name) {
            Some(status) if status == LOCK_STATUS_UNLOCKED => LockState::Unlocked,
            _ => LockState::Locked,
        }
    }

    /// Run the pre-fork phase for one spawn
    ///
    /// Locked users get their storage subtrees made shared, the data groups
    /// held for `on_unlock` and a stamp directory. Unlocked users need
    /// nothing here.
    pub fn prepare(
        &self,
        resolver: &PathResolver<'_>,
        params: &ParamCache,
        grants: &Grants<'_>,
        data_groups: Vec<MountOp>,
    ) -> SandboxResult<LockState> {
        let identity = resolver.identity();
        if Self::lock_state(identity, params) == LockState::Unlocked {
            debug!("User {} unlocked, no shared mounts", identity.user_id());
            return Ok(LockState::Unlocked);
        }
        let Some(var_name) = resolver.variable_package_name() else {
            return Err(SandboxError::ArgInvalid(format!(
                "no variable package name for {}",
                identity.bundle_name
            )));
        };
        let user = identity.user_id();
        let base = format!("{}{}/{}", SANDBOX_ROOT_DIR, user, var_name);

        let executor = MountExecutor::new(self.backend.as_ref(), ExecMode::Checked, false);
        let mut paths = Vec::new();
        for (dir, permission) in SHARED_STORAGE_DIRS {
            if let Some(permission) = permission {
                if !grants.has(permission) {
                    continue;
                }
            }
            let path = format!("{}{}", base, dir);
            if self
                .backend
                .mount(&MountRequest::propagation(&path, MountFlags::SHARED))
                .is_ok()
            {
                debug!("{} is already shared", path);
                continue;
            }
            let op = MountOp::bind(&path, &path, MountFlags::BIND | MountFlags::REC)
                .with_propagation(Propagation::Shared);
            match executor.mount_once(&op) {
                Ok(()) => paths.push(path),
                Err(e) => warn!("Shared mount of {} failed: {}", path, e),
            }
        }

        if !data_groups.is_empty() {
            let mut queue = self.pending.entry(user).or_default();
            for op in data_groups {
                queue.push(op)?;
            }
        }

        let isolated = if identity.is_isolated() { "isolated/" } else { "" };
        let stamp = format!(
            "{}{}/{}{}{}",
            SANDBOX_ROOT_DIR, user, isolated, var_name, LOCKED_STAMP_SUFFIX
        );
        if let Err(e) = self.backend.create_dir_all(&stamp, SANDBOX_DIR_MODE) {
            warn!("Failed to create lock stamp {}: {}", stamp, e);
        }

        let mut holder = self
            .holders
            .entry((user, identity.bundle_name.clone()))
            .or_default();
        holder.count += 1;
        for path in paths {
            if !holder.paths.contains(&path) {
                holder.paths.push(path);
            }
        }
        info!(
            "Shared mounts for {} user {} held {} times",
            identity.bundle_name, user, holder.count
        );
        Ok(LockState::Locked)
    }

    /// Data groups waiting for a user to unlock
    pub fn pending_data_groups(&self, user: UserId) -> usize {
        self.pending.get(&user).map(|q| q.len()).unwrap_or(0)
    }

    /// Lock stage: mount the data groups held for a user, shared
    ///
    /// Returns the number mounted. The queue is dropped afterwards, so a
    /// second call for the same user mounts nothing.
    pub fn on_unlock(&self, user: UserId) -> SandboxResult<usize> {
        let Some((_, mut queue)) = self.pending.remove(&user) else {
            debug!("No data groups pending for user {}", user);
            return Ok(0);
        };
        let executor = MountExecutor::new(self.backend.as_ref(), ExecMode::Checked, true);
        let mounted = queue.drain(&executor, Propagation::Shared)?;
        info!("User {} unlocked, {} data groups mounted", user, mounted);
        Ok(mounted)
    }

    /// Number of holders of a (user, bundle) pair
    pub fn holders(&self, user: UserId, bundle: &str) -> usize {
        self.holders
            .get(&(user, bundle.to_string()))
            .map(|h| h.count)
            .unwrap_or(0)
    }

    /// Drop one holder; the last one detaches the shared mounts
    pub fn release(&self, user: UserId, bundle: &str) -> usize {
        let key = (user, bundle.to_string());
        let remaining = match self.holders.get_mut(&key) {
            Some(mut holder) => {
                holder.count = holder.count.saturating_sub(1);
                holder.count
            }
            None => return 0,
        };
        if remaining > 0 {
            return remaining;
        }
        if let Some((_, holder)) = self.holders.remove(&key) {
            for path in holder.paths.iter().rev() {
                if let Err(e) = self.backend.umount(path, true) {
                    warn!("Failed to detach shared mount {}: {}", path, e);
                }
            }
            info!("Released shared mounts for {} user {}", bundle, user);
        }
        0
    }
}
