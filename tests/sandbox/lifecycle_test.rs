/*!
 * Spawn Lifecycle Tests
 * Root switching, shared mount holders, data groups and debug sandboxes
 */

use appspawn_sandbox::core::types::AppFlag;
use appspawn_sandbox::policy::loader::parse_document;
use appspawn_sandbox::policy::PolicyStore;
use appspawn_sandbox::sandbox::{
    AppIdentity, EngineConfig, LockState, NamespaceController, NamespaceState, QueueState,
    RootMode, SandboxEngineContext, SpawnSession, StaticParameters,
};
use appspawn_sandbox::security::backend::{BackendCall, MountFlags, NamespaceFlags};
use appspawn_sandbox::{SandboxError, SimulationBackend};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

const POLICY: &str = r#"{
    "common": [{
        "app-base": [{
            "mount-paths": [
                {"src-path": "/system/lib", "sandbox-path": "/system/lib", "sandbox-flags": ["bind", "rec"]}
            ]
        }]
    }],
    "debug": [{
        "common": [{
            "mount-paths": [
                {"src-path": "/data/app/el1/<currentUserId>/base/<PackageName>",
                 "sandbox-path": "/data/storage/el1/base", "sandbox-flags": ["bind", "rec"]}
            ]
        }]
    }]
}"#;

const ROOT: &str = "/mnt/sandbox/100/com.example.app";
const DATA_GROUPS: &str =
    r#"[{"dataGroupId": "g1", "gid": "3001", "dir": "/data/app/el2/100/group/uuid-1", "uuid": "uuid-1"}]"#;

fn context(
    backend: &SimulationBackend,
    config: EngineConfig,
    params: StaticParameters,
) -> SandboxEngineContext {
    let document = parse_document(Path::new("p.json"), POLICY.as_bytes()).unwrap();
    let store = Arc::new(PolicyStore::from_documents(vec![document], Vec::new()));
    SandboxEngineContext::with_store(config, store, Arc::new(backend.clone()), Arc::new(params))
}

fn identity() -> AppIdentity {
    AppIdentity::builder("com.example.app")
        .with_uid(20_010_029, 20_010_029)
        .with_data_groups(DATA_GROUPS)
        .build()
        .unwrap()
}

fn mounted_at(backend: &SimulationBackend, target: &str) -> bool {
    backend
        .mounts()
        .iter()
        .any(|m| m.source.is_some() && m.target == target)
}

#[test]
fn test_root_switch_only_once() {
    let backend = SimulationBackend::new();
    let mut controller = NamespaceController::new(&backend);
    controller.enter(NamespaceFlags::mount_only()).unwrap();
    controller.prepare_root(ROOT, RootMode::Shared).unwrap();
    controller.switch_root(ROOT, RootMode::Shared).unwrap();
    assert_eq!(controller.state(), NamespaceState::RootSwitched);

    let err = controller.switch_root(ROOT, RootMode::Shared).unwrap_err();
    assert!(matches!(err, SandboxError::InvalidState(_)));
    let chroots = backend
        .calls()
        .iter()
        .filter(|c| matches!(c, BackendCall::Chroot { .. }))
        .count();
    assert_eq!(chroots, 1);
}

#[test]
fn test_locked_user_holds_shared_mounts() {
    let backend = SimulationBackend::new();
    let ctx = context(&backend, EngineConfig::default(), StaticParameters::new());

    let mut first = SpawnSession::new();
    ctx.build_sandbox(&identity(), &mut first).unwrap();
    assert_eq!(first.lock_state, Some(LockState::Locked));
    ctx.build_sandbox(&identity(), &mut SpawnSession::new()).unwrap();
    assert_eq!(ctx.shared().holders(100, "com.example.app"), 2);

    assert_eq!(ctx.release_shared(100, "com.example.app"), 1);
    let el2 = format!("{}/data/storage/el2", ROOT);
    assert!(!backend.calls().contains(&BackendCall::Umount {
        target: el2.clone(),
        detach: true,
    }));

    assert_eq!(ctx.release_shared(100, "com.example.app"), 0);
    assert!(backend.calls().contains(&BackendCall::Umount {
        target: el2,
        detach: true,
    }));
    assert_eq!(ctx.shared().holders(100, "com.example.app"), 0);
}

fn call_index(backend: &SimulationBackend, pred: impl Fn(&BackendCall) -> bool) -> Option<usize> {
    backend.calls().iter().position(pred)
}

#[test]
fn test_locked_data_groups_wait_for_unlock() {
    let backend = SimulationBackend::new();
    let ctx = context(&backend, EngineConfig::default(), StaticParameters::new());
    let target = format!("{}/data/storage/el2/group/uuid-1", ROOT);

    let mut session = SpawnSession::new();
    ctx.build_sandbox(&identity(), &mut session).unwrap();
    ctx.build_sandbox(&identity(), &mut SpawnSession::new()).unwrap();
    assert_eq!(session.lock_state, Some(LockState::Locked));
    assert_eq!(session.data_groups.state(), QueueState::Drained);
    assert_eq!(ctx.shared().pending_data_groups(100), 1);

    backend.clear_calls();
    assert_eq!(ctx.on_unlock(100).unwrap(), 1);
    let mounts = backend.mounts();
    assert_eq!(mounts.len(), 2);
    assert_eq!(mounts[0].source.as_deref(), Some("/data/app/el2/100/group/uuid-1"));
    assert_eq!(mounts[0].target, target);
    assert_eq!(mounts[0].flags, MountFlags::BIND | MountFlags::REC);
    assert_eq!(mounts[1].flags, MountFlags::SHARED);

    assert_eq!(ctx.shared().pending_data_groups(100), 0);
    assert_eq!(ctx.on_unlock(100).unwrap(), 0);
}

#[test]
fn test_data_groups_mount_before_root_switch() {
    let backend = SimulationBackend::new();
    let params = StaticParameters::new().with("startup.appspawn.lockstatus_100", "0");
    let ctx = context(&backend, EngineConfig::default(), params);
    let target = format!("{}/data/storage/el2/group/uuid-1", ROOT);

    let mut session = SpawnSession::new();
    ctx.build_sandbox(&identity(), &mut session).unwrap();
    assert_eq!(session.lock_state, Some(LockState::Unlocked));
    assert_eq!(session.data_groups.state(), QueueState::Drained);
    assert_eq!(ctx.shared().holders(100, "com.example.app"), 0);
    assert_eq!(ctx.shared().pending_data_groups(100), 0);

    let group = call_index(&backend, |c| {
        matches!(c, BackendCall::Mount(m) if m.source.is_some() && m.target == target)
    })
    .unwrap();
    let pivot = call_index(&backend, |c| matches!(c, BackendCall::PivotRoot { .. })).unwrap();
    assert!(group < pivot);
    assert!(!backend.mounts().iter().any(|m| m.target == target && m.flags == MountFlags::SHARED));
}

#[test]
fn test_debug_sandbox_needs_developer_mode() {
    let tmp_target =
        "/mnt/debugtmp/100/debug_hap/com.example.app/data/storage/el1/base";
    let share_root = "/mnt/debug/100/debug_hap/com.example.app";
    let debug_identity = || {
        AppIdentity::builder("com.example.app")
            .with_uid(20_010_029, 20_010_029)
            .with_provision_type("debug")
            .build()
            .unwrap()
    };

    let backend = SimulationBackend::new();
    backend.mark_missing(tmp_target);
    backend.mark_missing(&format!("{}/data", share_root));
    let ctx = context(&backend, EngineConfig::default(), StaticParameters::new());
    ctx.build_sandbox(&debug_identity(), &mut SpawnSession::new()).unwrap();
    assert!(!mounted_at(&backend, tmp_target));

    let backend = SimulationBackend::new();
    backend.mark_missing(tmp_target);
    backend.mark_missing(&format!("{}/data", share_root));
    let config = EngineConfig {
        developer_mode: true,
        ..EngineConfig::default()
    };
    let ctx = context(&backend, config, StaticParameters::new());
    ctx.build_sandbox(&debug_identity(), &mut SpawnSession::new()).unwrap();
    assert!(mounted_at(&backend, tmp_target));
    assert!(backend
        .mounts()
        .iter()
        .any(|m| m.target == share_root && m.fs_type.as_deref() == Some("sharefs")));
}

#[test]
fn test_developer_flag_enables_debug_sandbox() {
    let tmp_target =
        "/mnt/debugtmp/100/debug_hap/com.example.app/data/storage/el1/base";
    let backend = SimulationBackend::new();
    backend.mark_missing(tmp_target);
    let ctx = context(&backend, EngineConfig::default(), StaticParameters::new());
    let identity = AppIdentity::builder("com.example.app")
        .with_uid(20_010_029, 20_010_029)
        .with_provision_type("debug")
        .with_flag(AppFlag::DeveloperMode)
        .build()
        .unwrap();
    ctx.build_sandbox(&identity, &mut SpawnSession::new()).unwrap();
    assert!(mounted_at(&backend, tmp_target));
}
