/*!
 * Mount Point Evaluation
 * Turns one policy `mount-paths` entry into a resolved mount, or a skip
 */

use super::special;
use crate::core::types::AppFlag;
use crate::policy::{MountPointConfig, SandboxSection};
use crate::sandbox::identity::AppIdentity;
use crate::sandbox::resolver::{join_param_paths, parse_param_template, ParamCache, PathResolver};
use crate::sandbox::types::{parse_dest_mode, MountOp};
use crate::security::backend::{MountFlags, Propagation, SyscallBackend};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Kind of policy section a mount point comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SectionKind {
    AppBase,
    AppResources,
    Individual,
    Permission,
    FlagsPoint,
    Debug,
    Nweb,
}

impl SectionKind {
    /// Sections whose entries carry options and DEC paths
    pub fn gated(self) -> bool {
        matches!(self, SectionKind::Permission | SectionKind::FlagsPoint | SectionKind::Debug)
    }

    /// Common sections fail the spawn unless an entry waives it
    pub fn checked_by_default(self) -> bool {
        matches!(self, SectionKind::AppBase | SectionKind::AppResources)
    }

    pub fn name(self) -> &'static str {
        match self {
            SectionKind::AppBase => "app-base",
            SectionKind::AppResources => "app-resources",
            SectionKind::Individual => "individual",
            SectionKind::Permission => "permission",
            SectionKind::FlagsPoint => "flags-point",
            SectionKind::Debug => "debug",
            SectionKind::Nweb => "nweb",
        }
    }
}

/// Section-level inputs shared by every entry of the section
#[derive(Debug, Clone)]
pub struct SectionScope {
    pub kind: SectionKind,
    pub root: String,
    /// The section's `flags` token matched a wps bundle
    pub wps_excluded: bool,
}

impl SectionScope {
    pub fn new(kind: SectionKind, root: impl Into<String>) -> Self {
        Self {
            kind,
            root: root.into(),
            wps_excluded: false,
        }
    }

    pub fn with_wps_check(mut self, section: &SandboxSection, identity: &AppIdentity) -> Self {
        self.wps_excluded = wps_excluded(section, identity);
        self
    }
}

/// Fully resolved mount point, never retained past one spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    pub op: MountOp,
    /// Permission-mode resolved `dec-paths`
    pub dec_paths: Vec<String>,
    pub dest_mode: Option<u32>,
}

/// Why an entry produced no mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingFields,
    AplExcluded,
    WpsExcluded,
    SourceMissing,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Mount(ResolvedMount),
    Skip(SkipReason),
}

/// Evaluate one entry for the current identity
///
/// Atomic-service source directories are provisioned here, before the
/// `create-sandbox-path` existence check sees them.
pub fn evaluate(
    entry: &MountPointConfig,
    scope: &SectionScope,
    resolver: &PathResolver<'_>,
    params: &ParamCache,
    backend: &dyn SyscallBackend,
) -> Evaluation {
    let identity = resolver.identity();
    if !entry.has_required_fields() {
        warn!(
            "Incomplete mount point in {} for {}",
            scope.kind.name(),
            identity.bundle_name
        );
        return Evaluation::Skip(SkipReason::MissingFields);
    }
    if entry.app_apl_name.as_deref() == Some(identity.apl.as_str()) {
        return Evaluation::Skip(SkipReason::AplExcluded);
    }
    if scope.wps_excluded && entry.src_path.as_deref().is_some_and(is_wps_source) {
        return Evaluation::Skip(SkipReason::WpsExcluded);
    }

    let source = match resolve_source(entry, resolver, params) {
        Some(source) => source,
        None => return Evaluation::Skip(SkipReason::Unresolved),
    };
    if let Some(template) = entry.src_path.as_deref() {
        if identity.is_atomic_service() && template.contains("<variablePackageName>") {
            special::ensure_atomic_service_dir(resolver, backend, &source);
        }
    }
    if entry.create_sandbox_path() && !backend.exists(&source) {
        debug!("Source {} missing, skipped", source);
        return Evaluation::Skip(SkipReason::SourceMissing);
    }

    let Some(sandbox_path) = entry.sandbox_path.as_deref() else {
        return Evaluation::Skip(SkipReason::MissingFields);
    };
    let relative = if scope.kind == SectionKind::Permission {
        resolver.resolve_permission(sandbox_path)
    } else {
        resolver.resolve(sandbox_path)
    };
    if relative.is_empty() {
        return Evaluation::Skip(SkipReason::Unresolved);
    }
    let target = format!("{}{}", scope.root, relative);

    let propagation = if entry.mount_shared() {
        Propagation::Shared
    } else {
        Propagation::Slave
    };
    let mut op = MountOp::bind(source, target, mount_flags(entry, identity))
        .with_propagation(propagation)
        .checked(entry.check_action_status_or(scope.kind.checked_by_default()));
    if let Some(fs_type) = entry.fs_type.as_deref() {
        op = op.with_fs_type(fs_type);
    }

    let mut dec_paths = Vec::new();
    if scope.kind.gated() {
        if let Some(options) = entry.options.as_deref() {
            op = op.with_options(&format!("{},user_id={}", options, identity.user_id()));
        }
        dec_paths = entry
            .dec_paths
            .iter()
            .map(|p| resolver.resolve_permission(p))
            .filter(|p| !p.is_empty())
            .collect();
    }

    let dest_mode = entry
        .dest_mode
        .as_deref()
        .map(parse_dest_mode)
        .filter(|mode| *mode != 0);

    Evaluation::Mount(ResolvedMount {
        op,
        dec_paths,
        dest_mode,
    })
}

/// `src-path` in normal mode, else the `param-src-path` pieces joined
fn resolve_source(
    entry: &MountPointConfig,
    resolver: &PathResolver<'_>,
    params: &ParamCache,
) -> Option<String> {
    let source = match (&entry.src_path, &entry.param_src_path) {
        (Some(src), _) => resolver.resolve(src),
        (None, Some(param)) => {
            let value = parse_param_template(params, param);
            join_param_paths(&[
                entry.pre_param_path.as_deref().unwrap_or(""),
                &value,
                entry.post_param_path.as_deref().unwrap_or(""),
            ])
        }
        (None, None) => String::new(),
    };
    (!source.is_empty()).then_some(source)
}

/// Customized flags for dac-override-sensitive apps, else `sandbox-flags`
///
/// Falls back to `MS_BIND|MS_REC` when neither list is usable.
pub fn mount_flags(entry: &MountPointConfig, identity: &AppIdentity) -> MountFlags {
    let customized = entry.dac_override_sensitive()
        && identity.has_flag(AppFlag::DacOverrideSensitive);
    let tokens = if customized {
        entry
            .sandbox_flags_customized
            .as_ref()
            .or(entry.sandbox_flags.as_ref())
    } else {
        entry.sandbox_flags.as_ref()
    };
    match tokens {
        Some(tokens) if !tokens.is_empty() => MountFlags::from_tokens(tokens.as_slice()),
        _ => MountFlags::BASIC,
    }
}

/// wps bundles whose section `flags` token is set skip their own app data
pub fn wps_excluded(section: &SandboxSection, identity: &AppIdentity) -> bool {
    let Some(flag) = section.flags.as_deref().and_then(AppFlag::from_token) else {
        return false;
    };
    identity.has_flag(flag) && identity.bundle_name.contains("wps")
}

fn is_wps_source(src: &str) -> bool {
    src.contains("/data/app")
        && (src.contains("/base") || src.contains("/database"))
        && src.contains("<PackageName>")
}
