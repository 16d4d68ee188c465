/*!
 * Policy Loading Tests
 * Configuration directories through the environment and engine context
 */

use appspawn_sandbox::core::types::AppFlag;
use appspawn_sandbox::policy::PolicyKind;
use appspawn_sandbox::sandbox::{
    AppIdentity, EngineConfig, SandboxEngineContext, SpawnSession, StaticParameters,
};
use appspawn_sandbox::security::backend::BackendCall;
use appspawn_sandbox::SimulationBackend;
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const NORMAL: &str = r#"{
    "common": [{
        "app-base": [{
            "mount-paths": [
                {"src-path": "/system/lib", "sandbox-path": "/system/lib", "sandbox-flags": ["bind", "rec"]}
            ]
        }]
    }],
    "permission": [{
        "ohos.permission.FOO": [{
            "mount-paths": [
                {"src-path": "/data/foo", "sandbox-path": "/data/foo", "sandbox-flags": ["bind"]}
            ]
        }]
    }]
}"#;

const ISOLATED: &str = r#"{
    "common": [{
        "app-base": [{
            "mount-paths": [
                {"src-path": "/system/isolated", "sandbox-path": "/system/lib", "sandbox-flags": ["bind"]}
            ]
        }]
    }]
}"#;

fn write_policy(dir: &Path, kind: PolicyKind, text: &str) {
    fs::write(dir.join(kind.default_file_name()), text).unwrap();
}

fn load(dirs: &[&Path], backend: &SimulationBackend) -> SandboxEngineContext {
    let joined = dirs
        .iter()
        .map(|d| d.display().to_string())
        .collect::<Vec<_>>()
        .join(":");
    std::env::set_var("SANDBOX_CONFIG_DIRS", joined);
    let config = EngineConfig::from_env();
    std::env::remove_var("SANDBOX_CONFIG_DIRS");

    SandboxEngineContext::with_backend(
        config.unwrap(),
        Arc::new(backend.clone()),
        Arc::new(StaticParameters::new()),
    )
    .unwrap()
}

fn mounted_sources(backend: &SimulationBackend) -> Vec<String> {
    backend.mounts().into_iter().filter_map(|m| m.source).collect()
}

#[test]
#[serial]
fn test_malformed_file_skipped() {
    let good = tempfile::tempdir().unwrap();
    let broken = tempfile::tempdir().unwrap();
    write_policy(good.path(), PolicyKind::Normal, NORMAL);
    write_policy(broken.path(), PolicyKind::Normal, "{ \"common\": [");

    let backend = SimulationBackend::new();
    let ctx = load(&[good.path(), broken.path()], &backend);
    assert_eq!(ctx.store().documents_of(PolicyKind::Normal).len(), 1);
    assert!(ctx.store().documents_of(PolicyKind::Isolated).is_empty());
    assert_eq!(ctx.registry().count(), 1);
    assert!(ctx.registry().lookup("ohos.permission.FOO").is_some());
}

#[test]
#[serial]
fn test_granted_permission_from_loaded_policy() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), PolicyKind::Normal, NORMAL);

    let backend = SimulationBackend::new();
    let ctx = load(&[dir.path()], &backend);
    let identity = AppIdentity::builder("com.example.app")
        .with_uid(20_010_029, 20_010_029)
        .with_permission("ohos.permission.FOO")
        .build()
        .unwrap();
    ctx.build_sandbox(&identity, &mut SpawnSession::new()).unwrap();

    let sources = mounted_sources(&backend);
    assert!(sources.iter().any(|s| s == "/system/lib"));
    assert!(sources.iter().any(|s| s == "/data/foo"));
}

#[test]
#[serial]
fn test_isolated_identity_uses_isolated_policy() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), PolicyKind::Normal, NORMAL);
    write_policy(dir.path(), PolicyKind::Isolated, ISOLATED);

    let backend = SimulationBackend::new();
    let ctx = load(&[dir.path()], &backend);
    let identity = AppIdentity::builder("com.example.app")
        .with_uid(20_010_029, 20_010_029)
        .with_flag(AppFlag::IsolatedSandboxType)
        .build()
        .unwrap();
    ctx.build_sandbox(&identity, &mut SpawnSession::new()).unwrap();

    let sources = mounted_sources(&backend);
    assert!(sources.iter().any(|s| s == "/system/isolated"));
    assert!(!sources.iter().any(|s| s == "/system/lib"));
}

#[test]
#[serial]
fn test_teardown_runs_unsandboxed() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), PolicyKind::Normal, NORMAL);

    let backend = SimulationBackend::new();
    let ctx = load(&[dir.path()], &backend);
    ctx.teardown();
    assert_eq!(ctx.registry().count(), 0);
    assert!(ctx.store().documents_of(PolicyKind::Normal).is_empty());

    let identity = AppIdentity::builder("com.example.app")
        .with_uid(20_010_029, 20_010_029)
        .build()
        .unwrap();
    ctx.build_sandbox(&identity, &mut SpawnSession::new()).unwrap();
    assert!(!backend
        .calls()
        .iter()
        .any(|c| matches!(c, BackendCall::Unshare(_))));
}
