/*!
 * Mount Planner Tests
 * Section gating, failure tolerance and replay determinism
 */

use appspawn_sandbox::core::types::AppFlag;
use appspawn_sandbox::permissions::{Grants, PermissionRegistry, PermissionSet};
use appspawn_sandbox::policy::loader::parse_document;
use appspawn_sandbox::policy::{PolicyDocument, PolicyStore};
use appspawn_sandbox::sandbox::identity::HspList;
use appspawn_sandbox::sandbox::{
    AppIdentity, EngineConfig, ExecMode, MountExecutor, MountPlanner, ParamCache, PathResolver,
    SandboxEngineContext, SpawnSession, StaticParameters,
};
use appspawn_sandbox::security::backend::{BackendCall, SimulatedOp};
use appspawn_sandbox::SimulationBackend;
use nix::errno::Errno;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

const POLICY: &str = r#"{
    "common": [{
        "app-base": [{
            "mount-paths": [
                {"src-path": "/system/etc", "sandbox-path": "/system/etc", "sandbox-flags": ["bind", "rec"]},
                {"src-path": "/system/fonts", "sandbox-path": "/system/fonts", "sandbox-flags": ["bind", "rec"],
                 "check-action-status": "false"},
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

const ROOT: &str = "/mnt/sandbox/100/com.example.app";

fn documents() -> Vec<Arc<PolicyDocument>> {
    vec![Arc::new(parse_document(Path::new("p.json"), POLICY.as_bytes()).unwrap())]
}

fn identity() -> AppIdentity {
    AppIdentity::builder("com.example.app")
        .with_uid(20_010_029, 20_010_029)
        .build()
        .unwrap()
}

fn registry() -> PermissionRegistry {
    let registry = PermissionRegistry::new();
    registry.register("ohos.permission.FOO");
    registry.renumber();
    registry
}

fn mounted_targets(backend: &SimulationBackend) -> Vec<String> {
    backend
        .mounts()
        .into_iter()
        .filter(|m| m.source.is_some())
        .map(|m| m.target)
        .collect()
}

#[test]
fn test_unset_permission_section_never_executes() {
    let backend = SimulationBackend::new();
    let identity = identity();
    let params = ParamCache::default();
    let resolver = PathResolver::new(&identity, &params);
    let registry = registry();
    let set = PermissionSet::with_width(registry.count());
    let grants = Grants::new(&registry, &set);
    let executor = MountExecutor::new(&backend, ExecMode::Checked, false);
    let documents = documents();
    let planner = MountPlanner::new(&resolver, &params, &grants, &executor, &documents);

    planner.plan_and_apply(&mut SpawnSession::new()).unwrap();
    let foo = format!("{}/data/foo", ROOT);
    assert!(!backend.calls().iter().any(|call| match call {
        BackendCall::Mount(request) => request.target == foo,
        BackendCall::CreateDir { path, .. } => *path == foo,
        _ => false,
    }));
}

#[test]
fn test_unchecked_failure_continues() {
    let backend = SimulationBackend::new();
    backend.fail_on(SimulatedOp::Mount, &format!("{}/system/fonts", ROOT), Errno::EACCES);
    let identity = identity();
    let params = ParamCache::default();
    let resolver = PathResolver::new(&identity, &params);
    let registry = registry();
    let set = PermissionSet::with_width(registry.count());
    let grants = Grants::new(&registry, &set);
    let executor = MountExecutor::new(&backend, ExecMode::Checked, false);
    let documents = documents();
    let planner = MountPlanner::new(&resolver, &params, &grants, &executor, &documents);

    let report = planner.plan_and_apply(&mut SpawnSession::new()).unwrap();
    assert_eq!(report.mounted, 2);
    assert_eq!(report.tolerated, 1);
    assert_eq!(
        mounted_targets(&backend).last().map(String::as_str),
        Some("/mnt/sandbox/100/com.example.app/system/lib")
    );
}

#[test]
fn test_common_failure_without_key_is_fatal() {
    let backend = SimulationBackend::new();
    backend.fail_on(SimulatedOp::Mount, &format!("{}/system/lib", ROOT), Errno::EPERM);
    let identity = identity();
    let params = ParamCache::default();
    let resolver = PathResolver::new(&identity, &params);
    let registry = registry();
    let set = PermissionSet::with_width(registry.count());
    let grants = Grants::new(&registry, &set);
    let executor = MountExecutor::new(&backend, ExecMode::Checked, false);
    let documents = documents();
    let planner = MountPlanner::new(&resolver, &params, &grants, &executor, &documents);

    assert!(planner.plan_and_apply(&mut SpawnSession::new()).is_err());

    let store = Arc::new(PolicyStore::from_documents(
        vec![parse_document(Path::new("p.json"), POLICY.as_bytes()).unwrap()],
        Vec::new(),
    ));
    let context = SandboxEngineContext::with_store(
        EngineConfig::default(),
        store,
        Arc::new(backend.clone()),
        Arc::new(StaticParameters::new()),
    );
    backend.clear_calls();
    assert!(context.build_sandbox(&identity, &mut SpawnSession::new()).is_err());
    assert!(!backend
        .calls()
        .iter()
        .any(|c| matches!(c, BackendCall::PivotRoot { .. })));
}

#[test]
fn test_hsp_traversal_rejected() {
    let backend = SimulationBackend::new();
    let identity = AppIdentity::builder("com.example.app")
        .with_uid(20_010_029, 20_010_029)
        .with_hsp_list(HspList {
            bundles: vec!["..".into()],
            modules: vec!["entry".into()],
            versions: vec!["v1".into()],
        })
        .build()
        .unwrap();
    let params = ParamCache::default();
    let resolver = PathResolver::new(&identity, &params);
    let registry = registry();
    let set = PermissionSet::with_width(registry.count());
    let grants = Grants::new(&registry, &set);
    let executor = MountExecutor::new(&backend, ExecMode::Checked, false);
    let documents = documents();
    let planner = MountPlanner::new(&resolver, &params, &grants, &executor, &documents);

    assert!(planner.plan_and_apply(&mut SpawnSession::new()).is_err());
    assert!(!mounted_targets(&backend)
        .iter()
        .any(|t| t.contains("/data/storage/el1/bundle/")));
}

#[test]
fn test_replay_is_deterministic() {
    let run = || {
        let backend = SimulationBackend::new();
        let store = Arc::new(PolicyStore::from_documents(
            vec![parse_document(Path::new("p.json"), POLICY.as_bytes()).unwrap()],
            Vec::new(),
        ));
        let context = SandboxEngineContext::with_store(
            EngineConfig::default(),
            store,
            Arc::new(backend.clone()),
            Arc::new(StaticParameters::new()),
        );
        let identity = AppIdentity::builder("com.example.app")
            .with_uid(20_010_029, 20_010_029)
            .with_flag(AppFlag::Overlay)
            .with_overlay("/data/app/el1/a/x.hap|/data/app/el1/b/y.hap")
            .with_permission("ohos.permission.FOO")
            .build()
            .unwrap();
        context.build_sandbox(&identity, &mut SpawnSession::new()).unwrap();
        backend.calls()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_dec_overflow_discards_batch() {
    let dec_paths: Vec<String> = (0..9)
        .map(|i| format!("\"/storage/Users/<currentUserId>/d{}\"", i))
        .collect();
    let text = format!(
        r#"{{"permission": [{{"ohos.permission.FOO": [{{"mount-paths": [
            {{"src-path": "/data/foo", "sandbox-path": "/data/foo", "sandbox-flags": ["bind"],
              "dec-paths": [{}]}}
        ]}}]}}]}}"#,
        dec_paths.join(",")
    );
    let documents = vec![Arc::new(parse_document(Path::new("p.json"), text.as_bytes()).unwrap())];

    let backend = SimulationBackend::new();
    let identity = identity();
    let params = ParamCache::default();
    let resolver = PathResolver::new(&identity, &params);
    let registry = registry();
    let set = PermissionSet::from_names(&registry, &["ohos.permission.FOO"]);
    let grants = Grants::new(&registry, &set);
    let executor = MountExecutor::new(&backend, ExecMode::Checked, false);
    let planner = MountPlanner::new(&resolver, &params, &grants, &executor, &documents);

    let mut session = SpawnSession::new();
    let report = planner.plan_and_apply(&mut session).unwrap();
    assert_eq!(report.mounted, 1);
    assert!(session.dec.is_empty());
}
