/*!
 * App Identity
 * Decoded spawn request fields the engine reads, plus a builder
 */

use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::{MAX_APP_GIDS, MAX_BUNDLE_NAME_LEN, UID_BASE};
use crate::core::types::{AccessTokenId, AppFlag, AppFlags, Gid, Uid, UserId};
use serde::{Deserialize, Serialize};

/// Parallel HSP arrays: entry `i` is `bundles[i]/versions[i]/modules[i]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HspList {
    pub bundles: Vec<String>,
    pub modules: Vec<String>,
    pub versions: Vec<String>,
}

/// Per-request inputs for the variable-count mounts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtInfo {
    pub hsp_list: Option<HspList>,
    /// Raw JSON array of `{dataGroupId, gid, dir, uuid}`
    pub data_group_list: Option<String>,
    /// `|`-separated hap paths
    pub overlay: Option<String>,
}

/// Identity of the app being spawned
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppIdentity {
    pub bundle_name: String,
    pub bundle_index: u32,
    pub uid: Uid,
    pub gid: Gid,
    pub gid_table: Vec<Gid>,
    pub apl: String,
    pub extension_type: Option<String>,
    pub account_id: Option<String>,
    pub parent_uid: Option<Uid>,
    pub access_token_id: AccessTokenId,
    pub msg_flags: AppFlags,
    /// Granted permission names
    pub permissions: Vec<String>,
    pub provision_type: Option<String>,
    pub process_type: Option<String>,
    /// File system type requested by the DLP manager
    pub dlp_fs_type: Option<String>,
    pub ext: ExtInfo,
}

impl AppIdentity {
    pub fn builder(bundle_name: &str) -> AppIdentityBuilder {
        AppIdentityBuilder::new(bundle_name)
    }

    /// `uid / UID_BASE`
    #[inline]
    pub fn user_id(&self) -> UserId {
        self.uid / UID_BASE
    }

    /// `parent_uid / UID_BASE`, 0 when not a child-process spawn
    pub fn host_user_id(&self) -> UserId {
        self.parent_uid.map(|uid| uid / UID_BASE).unwrap_or(0)
    }

    #[inline]
    pub fn has_flag(&self, flag: AppFlag) -> bool {
        self.msg_flags.contains(flag)
    }

    /// Clone instance with a non-zero index
    pub fn is_clone(&self) -> bool {
        self.has_flag(AppFlag::CloneEnable) && self.bundle_index > 0
    }

    pub fn is_atomic_service(&self) -> bool {
        self.has_flag(AppFlag::AtomicService)
    }

    /// Extension type, only when the extension sandbox flag is set
    pub fn extension(&self) -> Option<&str> {
        if !self.has_flag(AppFlag::ExtensionSandbox) {
            return None;
        }
        self.extension_type.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_isolated(&self) -> bool {
        self.has_flag(AppFlag::IsolatedSandboxType)
    }

    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.iter().any(|p| p == name)
    }

    /// Identity fields every path depends on are present
    pub fn is_resolvable(&self) -> bool {
        !self.bundle_name.is_empty()
    }

    /// Validate field limits
    pub fn validate(&self) -> SandboxResult<()> {
        if self.bundle_name.is_empty() {
            return Err(SandboxError::ArgInvalid("bundle name is empty".into()));
        }
        if self.bundle_name.len() > MAX_BUNDLE_NAME_LEN {
            return Err(SandboxError::ArgInvalid(format!(
                "bundle name longer than {} bytes",
                MAX_BUNDLE_NAME_LEN
            )));
        }
        if self.bundle_name.contains('/') || self.bundle_name == "." || self.bundle_name == ".." {
            return Err(SandboxError::ArgInvalid(format!(
                "bundle name {} is not a path component",
                self.bundle_name
            )));
        }
        if self.gid_table.len() > MAX_APP_GIDS {
            return Err(SandboxError::ResourceExhausted(format!(
                "{} gids exceed the table capacity {}",
                self.gid_table.len(),
                MAX_APP_GIDS
            )));
        }
        Ok(())
    }
}

/// Builder for AppIdentity
pub struct AppIdentityBuilder {
    identity: AppIdentity,
}

impl AppIdentityBuilder {
    pub fn new(bundle_name: &str) -> Self {
        Self {
            identity: AppIdentity {
                bundle_name: bundle_name.to_string(),
                apl: "normal".to_string(),
                ..AppIdentity::default()
            },
        }
    }

    pub fn with_uid(mut self, uid: Uid, gid: Gid) -> Self {
        self.identity.uid = uid;
        self.identity.gid = gid;
        self
    }

    pub fn with_bundle_index(mut self, index: u32) -> Self {
        self.identity.bundle_index = index;
        self
    }

    pub fn with_gids(mut self, gids: &[Gid]) -> Self {
        self.identity.gid_table = gids.to_vec();
        self
    }

    pub fn with_apl(mut self, apl: &str) -> Self {
        self.identity.apl = apl.to_string();
        self
    }

    pub fn with_extension_type(mut self, extension_type: &str) -> Self {
        self.identity.extension_type = Some(extension_type.to_string());
        self
    }

    pub fn with_account_id(mut self, account_id: &str) -> Self {
        self.identity.account_id = Some(account_id.to_string());
        self
    }

    pub fn with_parent_uid(mut self, uid: Uid) -> Self {
        self.identity.parent_uid = Some(uid);
        self
    }

    pub fn with_access_token(mut self, token_id: AccessTokenId) -> Self {
        self.identity.access_token_id = token_id;
        self
    }

    pub fn with_flag(mut self, flag: AppFlag) -> Self {
        self.identity.msg_flags.insert(flag);
        self
    }

    pub fn with_permission(mut self, name: &str) -> Self {
        self.identity.permissions.push(name.to_string());
        self
    }

    pub fn with_provision_type(mut self, provision_type: &str) -> Self {
        self.identity.provision_type = Some(provision_type.to_string());
        self
    }

    pub fn with_process_type(mut self, process_type: &str) -> Self {
        self.identity.process_type = Some(process_type.to_string());
        self
    }

    pub fn with_dlp_fs_type(mut self, fs_type: &str) -> Self {
        self.identity.dlp_fs_type = Some(fs_type.to_string());
        self
    }

    pub fn with_hsp_list(mut self, hsp: HspList) -> Self {
        self.identity.ext.hsp_list = Some(hsp);
        self
    }

    pub fn with_data_groups(mut self, json: &str) -> Self {
        self.identity.ext.data_group_list = Some(json.to_string());
        self
    }

    pub fn with_overlay(mut self, overlay: &str) -> Self {
        self.identity.ext.overlay = Some(overlay.to_string());
        self
    }

    /// Build and validate
    pub fn build(self) -> SandboxResult<AppIdentity> {
        self.identity.validate()?;
        Ok(self.identity)
    }
}
