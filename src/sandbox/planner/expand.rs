/*!
 * Request Expansions
 * Mounts whose count depends on the spawn request rather than the policy
 */

use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::json;
use crate::core::limits::{
    BUNDLE_RESOURCE_DEST, BUNDLE_RESOURCE_SRC, DATA_BUNDLES_PATH, DATA_GROUP_TEMPLATES,
    HSP_INSTALL_PATH, HSP_SANDBOX_PATH, OVERLAY_SANDBOX_PATH, OVERLAY_SEPARATOR,
    PRIVILEGED_APLS, PUBLIC_INSTALL_PATH,
};
use crate::core::types::{AppFlag, Gid};
use crate::permissions::Grants;
use crate::sandbox::identity::{AppIdentity, HspList};
use crate::sandbox::types::MountOp;
use crate::security::backend::MountFlags;
use ahash::RandomState;
use log::{debug, warn};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use std::collections::HashSet;

/// One element of the request's data group list
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataGroup {
    pub data_group_id: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub gid: Gid,
    pub dir: String,
    pub uuid: String,
}

fn valid_component(part: &str) -> bool {
    !part.is_empty() && part != "." && part != ".." && !part.contains('/')
}

/// Bind each shared library `bundle/version/module` under the sandbox
///
/// Mismatched array lengths or a component that is not a plain path segment
/// reject the whole list.
pub fn hsp_mounts(list: &HspList, root: &str) -> SandboxResult<Vec<MountOp>> {
    let count = list.bundles.len();
    if list.modules.len() != count || list.versions.len() != count {
        return Err(SandboxError::ArgInvalid(format!(
            "hsp list lengths differ: {} bundles, {} modules, {} versions",
            count,
            list.modules.len(),
            list.versions.len()
        )));
    }

    let mut ops = Vec::with_capacity(count);
    for i in 0..count {
        let (bundle, version, module) = (&list.bundles[i], &list.versions[i], &list.modules[i]);
        if ![bundle, version, module].iter().all(|p| valid_component(p)) {
            return Err(SandboxError::ArgInvalid(format!(
                "hsp entry {}/{}/{} is not a plain path",
                bundle, version, module
            )));
        }
        let source = format!("{}{}/{}/{}", HSP_INSTALL_PATH, bundle, version, module);
        let target = format!("{}{}{}/{}", root, HSP_SANDBOX_PATH, bundle, module);
        ops.push(MountOp::bind(source, target, MountFlags::BASIC));
    }
    Ok(ops)
}

/// Parse the data group list from its JSON text
pub fn parse_data_groups(text: &str) -> SandboxResult<Vec<DataGroup>> {
    json::from_slice(text.as_bytes())
        .map_err(|e| SandboxError::ArgInvalid(format!("data group list: {}", e)))
}

/// Map each data group to its per-encryption-level group directory
///
/// Entries whose `dir` names no known level, or el5 without its permission,
/// are skipped.
pub fn data_group_mounts(groups: &[DataGroup], root: &str, grants: &Grants<'_>) -> Vec<MountOp> {
    let mut ops = Vec::new();
    for group in groups {
        if group.uuid.is_empty() || group.dir.is_empty() {
            warn!("Data group {} has no dir or uuid", group.data_group_id);
            continue;
        }
        let template = DATA_GROUP_TEMPLATES
            .iter()
            .find(|(el, _, _)| group.dir.contains(&format!("/{}/", el)));
        let Some((el, dest, permission)) = template else {
            debug!("Data group dir {} matches no level", group.dir);
            continue;
        };
        if permission.is_some_and(|p| !grants.has(p)) {
            debug!("Data group {} on {} needs a permission", group.data_group_id, el);
            continue;
        }
        let target = format!("{}{}{}", root, dest, group.uuid);
        ops.push(MountOp::bind(
            group.dir.clone(),
            target,
            MountFlags::BIND | MountFlags::REC,
        ));
    }
    ops
}

/// Bind the directory of each overlay hap, once per directory
pub fn overlay_mounts(identity: &AppIdentity, root: &str) -> Vec<MountOp> {
    if !identity.has_flag(AppFlag::Overlay) {
        return Vec::new();
    }
    let Some(overlay) = identity.ext.overlay.as_deref() else {
        return Vec::new();
    };

    let mut seen: HashSet<&str, RandomState> = HashSet::default();
    let mut ops = Vec::new();
    for hap in overlay.split(OVERLAY_SEPARATOR).filter(|p| !p.is_empty()) {
        let Some(index) = hap.rfind('/') else {
            warn!("Overlay path {} has no directory", hap);
            continue;
        };
        let source = &hap[..index];
        if source.is_empty() || !seen.insert(source) {
            continue;
        }
        let name = source.rsplit('/').next().unwrap_or(source);
        let target = format!("{}{}{}", root, OVERLAY_SANDBOX_PATH, name);
        ops.push(MountOp::bind(source, target, MountFlags::BASIC));
    }
    ops
}

/// Bundle resource directory, read only
pub fn bundle_resource_mount(identity: &AppIdentity, root: &str) -> Option<MountOp> {
    identity.has_flag(AppFlag::BundleResources).then(|| {
        MountOp::bind(
            BUNDLE_RESOURCE_SRC,
            format!("{}{}", root, BUNDLE_RESOURCE_DEST),
            MountFlags::BASIC | MountFlags::RDONLY,
        )
    })
}

/// Public install directory for privileged apps or explicit bundle access
pub fn public_install_mount(identity: &AppIdentity, root: &str) -> Option<MountOp> {
    let privileged = PRIVILEGED_APLS.contains(&identity.apl.as_str());
    (privileged || identity.has_flag(AppFlag::AccessBundleDir)).then(|| {
        MountOp::bind(
            PUBLIC_INSTALL_PATH,
            format!("{}{}", root, DATA_BUNDLES_PATH),
            MountFlags::REC | MountFlags::BIND | MountFlags::RDONLY,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::limits::PROTECT_SCREEN_LOCK_DATA_PERMISSION;
    use crate::permissions::{PermissionRegistry, PermissionSet};
    use pretty_assertions::assert_eq;

    const ROOT: &str = "/mnt/sandbox/100/com.example.app";

    #[test]
    fn test_hsp_mounts() {
        let list = HspList {
            bundles: vec!["com.lib".into()],
            modules: vec!["entry".into()],
            versions: vec!["v1".into()],
        };
        let ops = hsp_mounts(&list, ROOT).unwrap();
        assert_eq!(ops[0].source, "/data/app/el1/bundle/public/com.lib/v1/entry");
        assert_eq!(
            ops[0].target,
            "/mnt/sandbox/100/com.example.app/data/storage/el1/bundle/com.lib/entry"
        );
    }

    #[test]
    fn test_hsp_rejects_bad_lists() {
        let uneven = HspList {
            bundles: vec!["a".into(), "b".into()],
            modules: vec!["m".into()],
            versions: vec!["v".into()],
        };
        assert!(matches!(hsp_mounts(&uneven, ROOT), Err(SandboxError::ArgInvalid(_))));

        let traversal = HspList {
            bundles: vec!["..".into()],
            modules: vec!["m".into()],
            versions: vec!["v".into()],
        };
        assert!(hsp_mounts(&traversal, ROOT).is_err());

        let slash = HspList {
            bundles: vec!["a".into()],
            modules: vec!["m/../../etc".into()],
            versions: vec!["v".into()],
        };
        assert!(hsp_mounts(&slash, ROOT).is_err());
    }

    #[test]
    fn test_data_group_levels() {
        let text = r#"[
            {"dataGroupId": "g1", "gid": "3001", "dir": "/data/app/el2/100/group/u1", "uuid": "u1"},
            {"dataGroupId": "g2", "gid": 3002, "dir": "/data/app/el5/100/group/u2", "uuid": "u2"},
            {"dataGroupId": "g3", "gid": 3003, "dir": "/data/app/other/u3", "uuid": "u3"}
        ]"#;
        let groups = parse_data_groups(text).unwrap();
        assert_eq!(groups[0].gid, 3001);
        assert_eq!(groups[1].gid, 3002);

        let registry = PermissionRegistry::new();
        registry.register(PROTECT_SCREEN_LOCK_DATA_PERMISSION);
        registry.renumber();
        let none = PermissionSet::with_width(registry.count());
        let ops = data_group_mounts(&groups, ROOT, &Grants::new(&registry, &none));
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].target, format!("{}/data/storage/el2/group/u1", ROOT));

        let el5 = PermissionSet::from_names(&registry, &[PROTECT_SCREEN_LOCK_DATA_PERMISSION]);
        let ops = data_group_mounts(&groups, ROOT, &Grants::new(&registry, &el5));
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].target, format!("{}/data/storage/el5/group/u2", ROOT));
    }

    #[test]
    fn test_malformed_data_groups() {
        assert!(parse_data_groups("{not json").is_err());
        assert!(parse_data_groups(r#"[{"dataGroupId": "g"}]"#).is_err());
    }

    #[test]
    fn test_overlay_dedupes_directories() {
        let identity = AppIdentity::builder("com.example.app")
            .with_flag(AppFlag::Overlay)
            .with_overlay("/data/app/el1/a/x.hap|/data/app/el1/a/y.hap|/data/app/el1/b/z.hap")
            .build()
            .unwrap();
        let ops = overlay_mounts(&identity, ROOT);
        let targets: Vec<&str> = ops.iter().map(|o| o.target.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                "/mnt/sandbox/100/com.example.app/data/storage/overlay/a",
                "/mnt/sandbox/100/com.example.app/data/storage/overlay/b",
            ]
        );

        let no_flag = AppIdentity::builder("com.example.app")
            .with_overlay("/data/app/el1/a/x.hap")
            .build()
            .unwrap();
        assert!(overlay_mounts(&no_flag, ROOT).is_empty());
    }

    #[test]
    fn test_public_install_for_privileged() {
        let system = AppIdentity::builder("a").with_apl("system_core").build().unwrap();
        let op = public_install_mount(&system, ROOT).unwrap();
        assert!(op.flags.contains(MountFlags::RDONLY));
        assert_eq!(op.target, format!("{}/data/bundles/", ROOT));

        let normal = AppIdentity::builder("a").with_apl("normal").build().unwrap();
        assert!(public_install_mount(&normal, ROOT).is_none());
        assert!(bundle_resource_mount(&normal, ROOT).is_none());
    }
}
