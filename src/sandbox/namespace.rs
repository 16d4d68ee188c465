/*!
 * Namespace Controller
 * Namespace entry and the root switch of the spawned child
 */

use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::{ACCESS_DLP_FILE_PERMISSION, SANDBOX_DIR_MODE};
use crate::core::types::AppFlag;
use crate::permissions::Grants;
use crate::policy::SandboxSection;
use crate::sandbox::executor::MountExecutor;
use crate::sandbox::identity::AppIdentity;
use crate::sandbox::types::{ExecMode, MountOp};
use crate::security::backend::{MountFlags, MountRequest, NamespaceFlags, SyscallBackend};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Lifecycle of the child's mount namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceState {
    Unconfigured,
    NamespacesEntered,
    RootSwitched,
}

/// How the sandbox root is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootMode {
    /// Sandbox switched off: the host root is bound in place
    Disabled,
    /// Shared sandbox: chroot into an existing tree
    Shared,
    /// Private tree entered with pivot_root
    Private,
}

impl RootMode {
    /// Pick the mode from the policy switch and the shared status
    pub fn select(switch_on: bool, shared: bool) -> Self {
        match (switch_on, shared) {
            (false, _) => RootMode::Disabled,
            (true, true) => RootMode::Shared,
            (true, false) => RootMode::Private,
        }
    }
}

/// Individual `sandbox-shared` or DLP file access
pub fn shared_status(individual: Option<&SandboxSection>, grants: &Grants<'_>) -> bool {
    individual.is_some_and(|s| s.shared()) || grants.has(ACCESS_DLP_FILE_PERMISSION)
}

/// Drives unshare, root preparation and the root switch
pub struct NamespaceController<'a> {
    backend: &'a dyn SyscallBackend,
    state: NamespaceState,
}

impl<'a> NamespaceController<'a> {
    pub fn new(backend: &'a dyn SyscallBackend) -> Self {
        Self {
            backend,
            state: NamespaceState::Unconfigured,
        }
    }

    pub fn state(&self) -> NamespaceState {
        self.state
    }

    fn expect_state(&self, expected: NamespaceState, op: &str) -> SandboxResult<()> {
        if self.state != expected {
            return Err(SandboxError::InvalidState(format!(
                "{} needs {:?}, namespace is {:?}",
                op, expected, self.state
            )));
        }
        Ok(())
    }

    /// Namespaces for the identity on top of the policy's `sandbox-ns-flags`
    pub fn namespace_flags(
        policy: NamespaceFlags,
        identity: &AppIdentity,
        developer_mode: bool,
    ) -> NamespaceFlags {
        let mut flags = policy;
        flags.mount = true;
        let isolated = identity.has_flag(AppFlag::IsolatedSandbox) && !developer_mode;
        let network = identity.has_flag(AppFlag::IsolatedNetwork)
            && (identity.extension().is_none() || !developer_mode);
        if isolated || network {
            flags.net = true;
        }
        flags
    }

    /// Unshare the namespaces; a new network namespace gets loopback up
    pub fn enter(&mut self, flags: NamespaceFlags) -> SandboxResult<()> {
        self.expect_state(NamespaceState::Unconfigured, "enter")?;
        self.backend.unshare(flags)?;
        if flags.net {
            if let Err(e) = self.backend.loopback_up() {
                warn!("Loopback up failed in new network namespace: {}", e);
            }
        }
        debug!("Entered namespaces {:?}", flags);
        self.state = NamespaceState::NamespacesEntered;
        Ok(())
    }

    /// Prepare the root mount before the planner populates it
    pub fn prepare_root(&self, root: &str, mode: RootMode) -> SandboxResult<()> {
        self.expect_state(NamespaceState::NamespacesEntered, "prepare_root")?;
        match mode {
            RootMode::Disabled => {
                self.slave_host_root()?;
                if let Err(e) = self.backend.create_dir_all(root, SANDBOX_DIR_MODE) {
                    debug!("Could not create {}: {}", root, e);
                }
                self.backend
                    .mount(&MountRequest::bind("/", root, MountFlags::BASIC))?;
            }
            RootMode::Private => {
                self.slave_host_root()?;
                let executor = MountExecutor::new(self.backend, ExecMode::Checked, false);
                executor.mount_once(&MountOp::bind(root, root, MountFlags::BASIC))?;
            }
            RootMode::Shared => {}
        }
        Ok(())
    }

    fn slave_host_root(&self) -> SandboxResult<()> {
        self.backend
            .mount(&MountRequest::propagation("/", MountFlags::REC | MountFlags::SLAVE))?;
        Ok(())
    }

    /// Make `root` the process root; only once per namespace
    pub fn switch_root(&mut self, root: &str, mode: RootMode) -> SandboxResult<()> {
        self.expect_state(NamespaceState::NamespacesEntered, "switch_root")?;
        self.backend.chdir(root)?;
        match mode {
            RootMode::Shared | RootMode::Disabled => {
                self.backend.chroot(root)?;
            }
            RootMode::Private => {
                self.backend.pivot_root(root, root)?;
                self.backend.umount(".", true)?;
            }
        }
        info!("Switched root to {} ({:?})", root, mode);
        self.state = NamespaceState::RootSwitched;
        Ok(())
    }
}
