/*!
 * Sandbox Engine Context
 * Process-wide tables and the per-spawn build pipeline
 */

use super::dec::{self, DecBatch, DecPolicyManager};
use super::debug::DebugSandbox;
use super::executor::MountExecutor;
use super::identity::AppIdentity;
use super::namespace::{self, NamespaceController, RootMode};
use super::planner::{expand, special, MountPlanner};
use super::resolver::{ParamCache, PathResolver, StaticParameters, SystemParameters};
use super::shared::{DataGroupQueue, LockState, SharedMountManager};
use super::types::ExecMode;
use crate::core::errors::{EngineError, EngineResult, SandboxResult};
use crate::core::limits::{DEC_DEVICE, DEFAULT_CONFIG_DIRS};
use crate::core::types::{AppFlag, Gid, UserId};
use crate::monitoring::{generate_trace_id, spawn_span};
use crate::permissions::{Grants, PermissionRegistry, PermissionSet};
use crate::policy::{DocumentList, PolicyKind, PolicyLoaderConfig, PolicyStore};
use crate::security::backend::{BackendManager, NamespaceFlags, Propagation, SyscallBackend};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub config_dirs: Vec<PathBuf>,
    pub normal_file: String,
    pub isolated_file: String,
    pub developer_mode: bool,
    /// This service spawns web renderer processes
    pub nweb_service: bool,
    /// Log and swallow build failures (module-test environments)
    pub bypass_failures: bool,
    pub dec_device: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let loader = PolicyLoaderConfig::default();
        Self {
            config_dirs: DEFAULT_CONFIG_DIRS.iter().map(PathBuf::from).collect(),
            normal_file: loader.normal_file,
            isolated_file: loader.isolated_file,
            developer_mode: false,
            nweb_service: false,
            bypass_failures: false,
            dec_device: DEC_DEVICE.to_string(),
        }
    }
}

fn env_bool(name: &str) -> EngineResult<Option<bool>> {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" => Ok(Some(true)),
            "0" | "false" | "off" | "" => Ok(Some(false)),
            other => Err(EngineError::Configuration(format!(
                "{} must be a boolean, got {}",
                name, other
            ))),
        },
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    /// Defaults overridden by `SANDBOX_CONFIG_DIRS` (colon separated),
    /// `SANDBOX_DEVELOPER_MODE` and `SANDBOX_BYPASS_FAILURES`
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();
        if let Ok(dirs) = std::env::var("SANDBOX_CONFIG_DIRS") {
            config.config_dirs = dirs
                .split(':')
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(developer) = env_bool("SANDBOX_DEVELOPER_MODE")? {
            config.developer_mode = developer;
        }
        if let Some(bypass) = env_bool("SANDBOX_BYPASS_FAILURES")? {
            config.bypass_failures = bypass;
        }
        Ok(config)
    }

    pub fn loader_config(&self) -> PolicyLoaderConfig {
        PolicyLoaderConfig {
            search_dirs: self.config_dirs.clone(),
            normal_file: self.normal_file.clone(),
            isolated_file: self.isolated_file.clone(),
        }
    }
}

/// State of one spawn, dropped when the child is set up
#[derive(Debug)]
pub struct SpawnSession {
    pub trace_id: String,
    pub sandbox_root: Option<String>,
    pub dec: DecBatch,
    pub data_groups: DataGroupQueue,
    /// Gids from matched sections, appended to the app's table
    pub extra_gids: Vec<Gid>,
    pub mounts: usize,
    /// `/dev/fuse` descriptor handed to the DLP manager
    pub fuse_fd: Option<i32>,
    pub lock_state: Option<LockState>,
}

impl SpawnSession {
    pub fn new() -> Self {
        Self {
            trace_id: generate_trace_id(),
            sandbox_root: None,
            dec: DecBatch::new(),
            data_groups: DataGroupQueue::new(),
            extra_gids: Vec::new(),
            mounts: 0,
            fuse_fd: None,
            lock_state: None,
        }
    }
}

impl Default for SpawnSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Loaded policy, permission table, parameters and syscall backend
pub struct SandboxEngineContext {
    config: EngineConfig,
    store: Arc<PolicyStore>,
    registry: Arc<PermissionRegistry>,
    params: ParamCache,
    backend: Arc<dyn SyscallBackend>,
    dec: DecPolicyManager,
    shared: SharedMountManager,
}

impl SandboxEngineContext {
    /// Load policy from the configured directories on the host backend
    pub fn load(config: EngineConfig) -> EngineResult<Self> {
        let backend: Arc<dyn SyscallBackend> = Arc::new(BackendManager::new());
        Self::with_backend(config, backend, Arc::new(StaticParameters::new()))
    }

    /// Load policy with an explicit backend and parameter source
    pub fn with_backend(
        config: EngineConfig,
        backend: Arc<dyn SyscallBackend>,
        params: Arc<dyn SystemParameters>,
    ) -> EngineResult<Self> {
        let store = Arc::new(PolicyStore::new(config.loader_config()));
        let documents = store.load();
        Ok(Self::from_store(config, store, backend, params, documents))
    }

    /// Context over documents already in a store
    pub fn with_store(
        config: EngineConfig,
        store: Arc<PolicyStore>,
        backend: Arc<dyn SyscallBackend>,
        params: Arc<dyn SystemParameters>,
    ) -> Self {
        let documents = PolicyKind::ALL
            .iter()
            .map(|kind| store.documents_of(*kind).len())
            .sum();
        Self::from_store(config, store, backend, params, documents)
    }

    fn from_store(
        config: EngineConfig,
        store: Arc<PolicyStore>,
        backend: Arc<dyn SyscallBackend>,
        params: Arc<dyn SystemParameters>,
        documents: usize,
    ) -> Self {
        let registry = Arc::new(PermissionRegistry::new());
        let permissions = registry.load_from(&store);
        info!(
            "Sandbox engine ready: {} documents, {} permissions",
            documents, permissions
        );
        Self {
            config,
            store,
            registry,
            params: ParamCache::new(params),
            dec: DecPolicyManager::new(Arc::clone(&backend)),
            shared: SharedMountManager::new(Arc::clone(&backend)),
            backend,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn registry(&self) -> &PermissionRegistry {
        &self.registry
    }

    pub fn params(&self) -> &ParamCache {
        &self.params
    }

    pub fn backend(&self) -> &dyn SyscallBackend {
        self.backend.as_ref()
    }

    pub fn shared(&self) -> &SharedMountManager {
        &self.shared
    }

    /// Service startup: install the fixed DEC rules
    pub fn startup(&self) -> bool {
        self.dec.startup()
    }

    fn documents_for(&self, identity: &AppIdentity) -> DocumentList {
        let kind = if identity.is_isolated() {
            PolicyKind::Isolated
        } else {
            PolicyKind::Normal
        };
        self.store.documents_of(kind)
    }

    /// Build the sandbox of one spawn
    ///
    /// With `bypass_failures` set, failures are logged and reported as success.
    pub fn build_sandbox(
        &self,
        identity: &AppIdentity,
        session: &mut SpawnSession,
    ) -> SandboxResult<()> {
        identity.validate()?;
        let span = spawn_span(&identity.bundle_name, identity.uid);
        let _entered = span.enter();
        session.trace_id = span.trace_id().to_string();

        let result = self.build(identity, session);
        span.record_mounts(session.mounts);
        match result {
            Ok(()) => {
                span.record_result(true);
                Ok(())
            }
            Err(e) if self.config.bypass_failures => {
                warn!("Sandbox build for {} failed, bypassed: {}", identity.bundle_name, e);
                span.record_error(&e.to_string());
                Ok(())
            }
            Err(e) => {
                span.record_error(&e.to_string());
                Err(e)
            }
        }
    }

    fn build(&self, identity: &AppIdentity, session: &mut SpawnSession) -> SandboxResult<()> {
        let documents = self.documents_for(identity);
        let Some(first) = documents.first() else {
            info!("No sandbox policy, {} runs unsandboxed", identity.bundle_name);
            return Ok(());
        };

        let set = PermissionSet::from_names(&self.registry, identity.permissions.as_slice());
        let grants = Grants::new(&self.registry, &set);

        let mut identity = identity.clone();
        special::update_flags(&mut identity, &grants, &self.params);
        let lock_state = SharedMountManager::lock_state(&identity, &self.params);
        let unlocked = lock_state == LockState::Unlocked;
        if unlocked {
            identity.msg_flags.insert(AppFlag::UnlockedStatus);
        }
        session.lock_state = Some(lock_state);

        let resolver = PathResolver::new(&identity, &self.params);
        let backend = self.backend.as_ref();
        let executor = MountExecutor::new(backend, ExecMode::Checked, unlocked);
        let planner = MountPlanner::new(&resolver, &self.params, &grants, &executor, &documents);
        let nweb = self.config.nweb_service && identity.process_type.is_some();

        let root = planner.sandbox_root(session)?;
        if !nweb {
            let data_groups = match identity.ext.data_group_list.as_deref() {
                Some(text) => {
                    let groups = expand::parse_data_groups(text)?;
                    expand::data_group_mounts(&groups, &root, &grants)
                }
                None => Vec::new(),
            };
            self.shared
                .prepare(&resolver, &self.params, &grants, data_groups)?;
        }

        let policy_flags = NamespaceFlags::from_tokens(first.ns_flag_tokens());
        let flags = NamespaceController::namespace_flags(
            policy_flags,
            &identity,
            self.config.developer_mode,
        );
        let switch_on = first.top_switch() && first.app_base().map_or(true, |b| b.switch_on());
        let individual = documents
            .iter()
            .find_map(|d| d.individual(&identity.bundle_name));
        let mode = RootMode::select(switch_on, namespace::shared_status(individual, &grants));

        let mut controller = NamespaceController::new(backend);
        controller.enter(flags)?;
        controller.prepare_root(&root, mode)?;

        let report = if nweb {
            planner.plan_nweb(session)?
        } else {
            planner.plan_and_apply(session)?
        };
        debug!("Plan report {:?}", report);

        // Paths are host paths under the root, so this must precede the switch
        let drained = session.data_groups.drain(&executor, Propagation::Slave)?;
        session.mounts += drained;
        debug!("{} data group mounts applied", drained);

        DebugSandbox::new(backend).install(
            &resolver,
            &self.params,
            &grants,
            &documents,
            self.config.developer_mode,
        )?;

        if let Some(entry) = dec::download_dir_entry(&resolver) {
            if let Err(e) = session.dec.accumulate(vec![entry]) {
                warn!("Download dir rule dropped: {}", e);
            }
        }
        if let Err(e) = session.dec.accumulate(dec::deny_entries(&grants)) {
            warn!("Deny rules dropped: {}", e);
        }
        self.dec.submit(&mut session.dec, identity.access_token_id);

        controller.switch_root(&root, mode)?;
        Ok(())
    }

    /// Lock stage of a user: mount the data groups held while it was locked
    pub fn on_unlock(&self, user: UserId) -> SandboxResult<usize> {
        self.shared.on_unlock(user)
    }

    /// Release one shared-mount holder of a (user, bundle) pair
    pub fn release_shared(&self, user: UserId, bundle: &str) -> usize {
        self.shared.release(user, bundle)
    }

    /// Remove the debug hap directories of a user
    pub fn uninstall_debug(&self, user: UserId) -> usize {
        let mut documents: Vec<_> = self.store.documents_of(PolicyKind::Normal).to_vec();
        documents.extend(self.store.documents_of(PolicyKind::Isolated).iter().cloned());
        DebugSandbox::new(self.backend.as_ref()).uninstall(user, &documents)
    }

    /// Drop the permission table and policy documents
    pub fn teardown(&self) {
        self.registry.teardown();
        for kind in PolicyKind::ALL {
            self.store.release(kind);
        }
        info!("Sandbox engine torn down");
    }
}
