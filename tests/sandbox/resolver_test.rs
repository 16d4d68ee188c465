/*!
 * Path Resolver Tests
 * Token substitution across identity forms
 */

use appspawn_sandbox::core::types::AppFlag;
use appspawn_sandbox::sandbox::{AppIdentity, ParamCache, PathResolver, StaticParameters};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

fn app() -> AppIdentity {
    AppIdentity::builder("com.example.app")
        .with_uid(20_010_029, 20_010_029)
        .build()
        .unwrap()
}

#[test]
fn test_user_id_from_uid() {
    let identity = app();
    let params = ParamCache::default();
    let resolver = PathResolver::new(&identity, &params);
    assert_eq!(
        resolver.resolve("/data/app/el1/<currentUserId>/base/<PackageName>"),
        "/data/app/el1/100/base/com.example.app"
    );
}

#[test]
fn test_clone_variable_name() {
    let identity = AppIdentity::builder("com.example.app")
        .with_uid(20_010_029, 20_010_029)
        .with_flag(AppFlag::CloneEnable)
        .with_bundle_index(1)
        .build()
        .unwrap();
    let params = ParamCache::default();
    let resolver = PathResolver::new(&identity, &params);
    assert_eq!(
        resolver.resolve("/data/<variablePackageName>"),
        "/data/+clone-1+com.example.app"
    );
    assert_eq!(resolver.default_sandbox_root(), "/mnt/sandbox/100/+clone-1+com.example.app");
}

#[test]
fn test_permission_mode_user() {
    let identity = app();
    let params = ParamCache::default();
    let resolver = PathResolver::new(&identity, &params);
    assert_eq!(
        resolver.resolve_permission("/storage/Users/<currentUserId>/appdata"),
        "/storage/Users/currentUser/appdata"
    );
}

#[test]
fn test_parameter_tokens() {
    let identity = app();
    let params = ParamCache::new(Arc::new(
        StaticParameters::new().with("persist.arkwebcore.package_name", "com.ohos.arkwebcore"),
    ));
    let resolver = PathResolver::new(&identity, &params);
    assert_eq!(
        resolver.resolve("/data/app/el1/bundle/public/<arkWebPackageName>"),
        "/data/app/el1/bundle/public/com.ohos.arkwebcore"
    );
}

#[test]
fn test_substituted_text_not_rescanned() {
    let identity = AppIdentity::builder("<PackageName>").build().unwrap();
    let params = ParamCache::default();
    let resolver = PathResolver::new(&identity, &params);
    assert_eq!(resolver.resolve("/x/<PackageName>/y"), "/x/<PackageName>/y");
}

proptest! {
    #[test]
    fn prop_identity_free_templates_unchanged(template in "[a-z/._-]{0,64}") {
        let identity = app();
        let params = ParamCache::default();
        let resolver = PathResolver::new(&identity, &params);
        prop_assert_eq!(resolver.resolve(&template), template);
    }

    #[test]
    fn prop_resolution_is_deterministic(
        prefix in "[a-z/]{0,16}",
        suffix in "[a-z/]{0,16}",
        index in 0u32..8,
    ) {
        let identity = AppIdentity::builder("com.example.app")
            .with_uid(20_010_029, 20_010_029)
            .with_flag(AppFlag::CloneEnable)
            .with_bundle_index(index)
            .build()
            .unwrap();
        let params = ParamCache::default();
        let resolver = PathResolver::new(&identity, &params);
        let template = format!("{}<variablePackageName>{}<currentUserId>", prefix, suffix);
        prop_assert_eq!(resolver.resolve(&template), resolver.resolve(&template));
    }
}
