/*!
 * Policy Types
 * Typed, parse-once representation of the sandbox policy documents
 */

use crate::core::limits::{APP_SANDBOX_CONFIG, ISOLATED_SANDBOX_CONFIG};
use miette::Diagnostic;
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{serde_as, skip_serializing_none, OneOrMany};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type for policy operations
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Policy loading errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum PolicyError {
    #[error("Failed to read {path}: {message}")]
    #[diagnostic(
        code(policy::io_error),
        help("The policy file exists but could not be read. Check permissions.")
    )]
    Io { path: String, message: String },

    #[error("Failed to parse {path}: {message}")]
    #[diagnostic(
        code(policy::parse_error),
        help("The policy file is not valid JSON or does not match the policy schema.")
    )]
    Parse { path: String, message: String },

    #[error("Invalid search path: {0}")]
    #[diagnostic(
        code(policy::invalid_search_path),
        help("Configuration directories must be absolute paths.")
    )]
    InvalidSearchPath(String),
}

/// Which policy document family a spawn uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Normal,
    Isolated,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 2] = [PolicyKind::Normal, PolicyKind::Isolated];

    /// Default file name searched in every config directory
    pub fn default_file_name(self) -> &'static str {
        match self {
            PolicyKind::Normal => APP_SANDBOX_CONFIG,
            PolicyKind::Isolated => ISOLATED_SANDBOX_CONFIG,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Normal => write!(f, "normal"),
            PolicyKind::Isolated => write!(f, "isolated"),
        }
    }
}

// ============================================================================
// Field helpers
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBool {
    Bool(bool),
    Text(String),
}

/// Booleans are written either as JSON bools or as "true"/"false"/"ON"/"OFF"
fn flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawBool>::deserialize(deserializer)?;
    Ok(raw.map(|value| match value {
        RawBool::Bool(b) => b,
        RawBool::Text(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("on")
        }
    }))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawGid {
    Number(i64),
    Text(String),
}

/// Gids as integers or numeric strings; non-positive or unparsable values are dropped
fn gid_list<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<RawGid>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|gid| match gid {
            RawGid::Number(n) => Some(n),
            RawGid::Text(s) => s.trim().parse::<i64>().ok(),
        })
        .filter(|n| *n > 0 && *n <= u32::MAX as i64)
        .map(|n| n as u32)
        .collect())
}

// ============================================================================
// Entries
// ============================================================================

/// One `mount-paths` entry as written in the policy
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MountPointConfig {
    pub src_path: Option<String>,
    pub param_src_path: Option<String>,
    pub pre_param_path: Option<String>,
    pub post_param_path: Option<String>,
    pub sandbox_path: Option<String>,
    pub fs_type: Option<String>,
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub sandbox_flags: Option<Vec<String>>,
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub sandbox_flags_customized: Option<Vec<String>>,
    pub options: Option<String>,
    #[serde_as(as = "OneOrMany<_>")]
    pub dec_paths: Vec<String>,
    pub dest_mode: Option<String>,
    #[serde(deserialize_with = "flexible_bool")]
    pub create_sandbox_path: Option<bool>,
    #[serde(deserialize_with = "flexible_bool")]
    pub check_action_status: Option<bool>,
    pub app_apl_name: Option<String>,
    #[serde(deserialize_with = "flexible_bool")]
    pub dac_override_sensitive: Option<bool>,
    #[serde(deserialize_with = "flexible_bool")]
    pub mount_shared_flag: Option<bool>,
}

impl MountPointConfig {
    /// Source, destination and a flag list are all present
    pub fn has_required_fields(&self) -> bool {
        (self.src_path.is_some() || self.param_src_path.is_some())
            && self.sandbox_path.is_some()
            && (self.sandbox_flags.is_some() || self.sandbox_flags_customized.is_some())
    }

    pub fn check_action_status(&self) -> bool {
        self.check_action_status.unwrap_or(false)
    }

    /// Explicit `check-action-status`, else the section's default
    pub fn check_action_status_or(&self, default: bool) -> bool {
        self.check_action_status.unwrap_or(default)
    }

    pub fn create_sandbox_path(&self) -> bool {
        self.create_sandbox_path.unwrap_or(false)
    }

    pub fn dac_override_sensitive(&self) -> bool {
        self.dac_override_sensitive.unwrap_or(false)
    }

    pub fn mount_shared(&self) -> bool {
        self.mount_shared_flag.unwrap_or(false)
    }
}

/// One `symbol-links` entry
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SymlinkConfig {
    pub target_name: Option<String>,
    pub link_name: Option<String>,
    #[serde(deserialize_with = "flexible_bool")]
    pub check_action_status: Option<bool>,
}

impl SymlinkConfig {
    pub fn check_action_status(&self) -> bool {
        self.check_action_status.unwrap_or(false)
    }

    pub fn check_action_status_or(&self, default: bool) -> bool {
        self.check_action_status.unwrap_or(default)
    }
}

/// One `flags-point` entry: mounts applied only when `flags` matches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FlagsPointConfig {
    pub flags: String,
    pub mount_paths: Vec<MountPointConfig>,
    pub symbol_links: Vec<SymlinkConfig>,
}

/// Per-bundle, per-permission or common configuration block
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SandboxSection {
    pub sandbox_root: Option<String>,
    pub sandbox_ns_flags: Vec<String>,
    #[serde(deserialize_with = "flexible_bool")]
    pub sandbox_switch: Option<bool>,
    #[serde(deserialize_with = "flexible_bool")]
    pub sandbox_shared: Option<bool>,
    /// Message flag token gating the `wps` source exclusion
    pub flags: Option<String>,
    pub mount_paths: Vec<MountPointConfig>,
    pub symbol_links: Vec<SymlinkConfig>,
    #[serde(deserialize_with = "gid_list")]
    pub gids: Vec<u32>,
    #[serde(rename = "flags-point")]
    pub flags_points: Vec<FlagsPointConfig>,
}

impl SandboxSection {
    /// `sandbox-switch`, on unless stated otherwise
    pub fn switch_on(&self) -> bool {
        self.sandbox_switch.unwrap_or(true)
    }

    pub fn shared(&self) -> bool {
        self.sandbox_shared.unwrap_or(false)
    }
}

/// `common[0]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CommonBlock {
    #[serde(deserialize_with = "flexible_bool", skip_serializing_if = "Option::is_none")]
    pub top_sandbox_switch: Option<bool>,
    pub app_base: Vec<SandboxSection>,
    pub app_resources: Vec<SandboxSection>,
}

/// Sections keyed by bundle or permission name
pub type SectionMap = BTreeMap<String, Vec<SandboxSection>>;

/// `debug[0]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugBlock {
    pub common: Vec<SandboxSection>,
    pub permission: Vec<SectionMap>,
}

/// One parsed policy file
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PolicyDocument {
    pub sandbox_root: Option<String>,
    pub sandbox_ns_flags: Vec<String>,
    #[serde(deserialize_with = "flexible_bool")]
    pub top_sandbox_switch: Option<bool>,
    pub common: Vec<CommonBlock>,
    pub individual: Vec<SectionMap>,
    pub permission: Vec<SectionMap>,
    pub debug: Vec<DebugBlock>,
}

impl PolicyDocument {
    pub fn common(&self) -> Option<&CommonBlock> {
        self.common.first()
    }

    pub fn app_base(&self) -> Option<&SandboxSection> {
        self.common().and_then(|c| c.app_base.first())
    }

    pub fn app_resources(&self) -> Option<&SandboxSection> {
        self.common().and_then(|c| c.app_resources.first())
    }

    /// `individual[0][name][0]`
    pub fn individual(&self, name: &str) -> Option<&SandboxSection> {
        self.individual
            .first()
            .and_then(|map| map.get(name))
            .and_then(|sections| sections.first())
    }

    /// `permission[0]` entries in name order
    pub fn permissions(&self) -> impl Iterator<Item = (&str, &SandboxSection)> {
        self.permission
            .first()
            .into_iter()
            .flat_map(|map| map.iter())
            .filter_map(|(name, sections)| sections.first().map(|s| (name.as_str(), s)))
    }

    /// `top-sandbox-switch` from `common[0]`, then the document level, default on
    pub fn top_switch(&self) -> bool {
        self.common()
            .and_then(|c| c.top_sandbox_switch)
            .or(self.top_sandbox_switch)
            .unwrap_or(true)
    }

    /// Namespace tokens from `app-base[0]`, falling back to the document level
    pub fn ns_flag_tokens(&self) -> &[String] {
        match self.app_base() {
            Some(base) if !base.sandbox_ns_flags.is_empty() => &base.sandbox_ns_flags,
            _ => &self.sandbox_ns_flags,
        }
    }

    /// `sandbox-root` override from `app-base[0]`, then the document level
    pub fn root_override(&self) -> Option<&str> {
        self.app_base()
            .and_then(|b| b.sandbox_root.as_deref())
            .or(self.sandbox_root.as_deref())
    }

    pub fn debug_common(&self) -> Option<&SandboxSection> {
        self.debug.first().and_then(|d| d.common.first())
    }

    pub fn debug_permissions(&self) -> impl Iterator<Item = (&str, &SandboxSection)> {
        self.debug
            .first()
            .and_then(|d| d.permission.first())
            .into_iter()
            .flat_map(|map| map.iter())
            .filter_map(|(name, sections)| sections.first().map(|s| (name.as_str(), s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "common": [{
            "top-sandbox-switch": "ON",
            "app-base": [{
                "sandbox-root": "/mnt/sandbox/<currentUserId>/<PackageName>",
                "sandbox-ns-flags": ["pid", "net"],
                "mount-paths": [{
                    "src-path": "/system/etc",
                    "sandbox-path": "/system/etc",
                    "sandbox-flags": ["bind", "rec"],
                    "check-action-status": "true"
                }]
            }],
            "app-resources": [{
                "flags-point": [{
                    "flags": "DLP_MANAGER_READ_ONLY",
                    "mount-paths": [{
                        "src-path": "/data/app/el1/<currentUserId>/base/<PackageName>",
                        "sandbox-path": "/data/storage/el1/base",
                        "sandbox-flags": "rdonly"
                    }]
                }]
            }]
        }],
        "individual": [{
            "com.example.app": [{
                "sandbox-switch": "OFF",
                "sandbox-shared": true,
                "gids": [1006, "1008", -1, "abc", 0]
            }]
        }],
        "permission": [{
            "ohos.permission.FOO": [{ "mount-paths": [] }],
            "ohos.permission.BAR": [{ "mount-paths": [] }]
        }]
    }"#;

    #[test]
    fn test_parse_sample_document() {
        let doc: PolicyDocument = serde_json::from_str(SAMPLE).unwrap();
        assert!(doc.top_switch());
        assert_eq!(doc.ns_flag_tokens(), &["pid".to_string(), "net".to_string()]);

        let base = doc.app_base().unwrap();
        assert_eq!(base.mount_paths.len(), 1);
        assert!(base.mount_paths[0].check_action_status());
        assert!(base.mount_paths[0].has_required_fields());

        let point = &doc.app_resources().unwrap().flags_points[0];
        assert_eq!(point.flags, "DLP_MANAGER_READ_ONLY");
        assert_eq!(
            point.mount_paths[0].sandbox_flags,
            Some(vec!["rdonly".to_string()])
        );
    }

    #[test]
    fn test_individual_section_fields() {
        let doc: PolicyDocument = serde_json::from_str(SAMPLE).unwrap();
        let section = doc.individual("com.example.app").unwrap();
        assert!(!section.switch_on());
        assert!(section.shared());
        assert_eq!(section.gids, vec![1006, 1008]);
        assert!(doc.individual("com.other").is_none());
    }

    #[test]
    fn test_permissions_iterate_in_name_order() {
        let doc: PolicyDocument = serde_json::from_str(SAMPLE).unwrap();
        let names: Vec<&str> = doc.permissions().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["ohos.permission.BAR", "ohos.permission.FOO"]);
    }

    #[test]
    fn test_defaults_for_empty_document() {
        let doc: PolicyDocument = serde_json::from_str("{}").unwrap();
        assert!(doc.top_switch());
        assert!(doc.app_base().is_none());
        assert!(doc.root_override().is_none());
        assert_eq!(doc.permissions().count(), 0);
    }

    #[test]
    fn test_missing_required_fields() {
        let entry: MountPointConfig =
            serde_json::from_str(r#"{"src-path": "/a", "sandbox-path": "/b"}"#).unwrap();
        assert!(!entry.has_required_fields());
        assert!(!entry.check_action_status());
    }
}
