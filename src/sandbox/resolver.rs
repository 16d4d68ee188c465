/*!
 * Path Resolver
 * Single-pass substitution of identity tokens in policy path templates
 */

use super::identity::AppIdentity;
use crate::core::limits::{
    DEFAULT_ROOT_TEMPLATES, PARAM_ARKWEB_PACKAGE, PARAM_DEVICE_MODEL, SANDBOX_ROOT_DIR,
};
use crate::core::types::AppFlag;
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only platform parameters (`const.*`, `persist.*`, `startup.*`)
#[cfg_attr(test, mockall::automock)]
pub trait SystemParameters: Send + Sync {
    /// Value of a parameter; `None` when unset
    fn get(&self, name: &str) -> Option<String>;
}

/// Fixed parameter table, used off-device and in tests
#[derive(Debug, Clone, Default)]
pub struct StaticParameters {
    values: BTreeMap<String, String>,
}

impl StaticParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }
}

impl SystemParameters for StaticParameters {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Parameter source with a cache for values that never change after boot
#[derive(Clone)]
pub struct ParamCache {
    source: Arc<dyn SystemParameters>,
    cache: Arc<DashMap<String, String, RandomState>>,
}

impl ParamCache {
    pub fn new(source: Arc<dyn SystemParameters>) -> Self {
        Self {
            source,
            cache: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    /// Uncached lookup; empty values count as unset
    pub fn get(&self, name: &str) -> Option<String> {
        self.source.get(name).filter(|v| !v.is_empty())
    }

    /// Cached lookup; only non-empty values are cached
    pub fn get_cached(&self, name: &str) -> String {
        if let Some(value) = self.cache.get(name) {
            return value.clone();
        }
        match self.get(name) {
            Some(value) => {
                self.cache.insert(name.to_string(), value.clone());
                value
            }
            None => String::new(),
        }
    }

    /// Boolean parameter ("true"/"1"), false when unset
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
    }
}

impl Default for ParamCache {
    fn default() -> Self {
        Self::new(Arc::new(StaticParameters::new()))
    }
}

/// Which token table applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Every identity token, numeric user ids
    Normal,
    /// File-access-manager surface: `<currentUserId>` becomes `currentUser`
    Permission,
}

/// Resolves path templates for one identity
pub struct PathResolver<'a> {
    identity: &'a AppIdentity,
    params: &'a ParamCache,
}

impl<'a> PathResolver<'a> {
    pub fn new(identity: &'a AppIdentity, params: &'a ParamCache) -> Self {
        Self { identity, params }
    }

    pub fn identity(&self) -> &AppIdentity {
        self.identity
    }

    /// Resolve in normal mode
    pub fn resolve(&self, template: &str) -> String {
        self.resolve_with(template, ResolveMode::Normal)
    }

    /// Resolve in permission mode
    pub fn resolve_permission(&self, template: &str) -> String {
        self.resolve_with(template, ResolveMode::Permission)
    }

    /// Scan left to right, substituting each recognised token once
    ///
    /// Substituted text is never scanned again. Unknown tokens are copied
    /// through. Returns an empty string when the identity cannot be resolved
    /// or a token needs data the identity lacks.
    pub fn resolve_with(&self, template: &str, mode: ResolveMode) -> String {
        if !self.identity.is_resolvable() {
            return String::new();
        }

        let mut out = String::with_capacity(template.len() + 32);
        let mut rest = template;
        while let Some(start) = rest.find('<') {
            out.push_str(&rest[..start]);
            let candidate = &rest[start..];
            let Some(end) = candidate[1..].find(['>', '<']).map(|i| i + 1) else {
                out.push_str(candidate);
                return out;
            };
            if candidate.as_bytes()[end] == b'<' {
                out.push_str(&candidate[..end]);
                rest = &candidate[end..];
                continue;
            }
            let token = &candidate[..=end];
            match self.substitute(token, mode) {
                Some(Some(value)) => out.push_str(&value),
                Some(None) => {
                    warn!("Cannot resolve {} in {} for {}", token, template, self.identity.bundle_name);
                    return String::new();
                }
                None => out.push_str(token),
            }
            rest = &candidate[end + 1..];
        }
        out.push_str(rest);
        out
    }

    /// `None`: not a token of this mode. `Some(None)`: token without a value.
    fn substitute(&self, token: &str, mode: ResolveMode) -> Option<Option<String>> {
        let identity = self.identity;
        let value = match (token, mode) {
            ("<PackageName_index>", _) => Some(self.package_name_index()),
            ("<PackageName>", _) => Some(identity.bundle_name.clone()),
            ("<currentUserId>", ResolveMode::Normal) => Some(identity.user_id().to_string()),
            ("<currentUserId>", ResolveMode::Permission) => Some("currentUser".to_string()),
            ("<permissionUserId>", ResolveMode::Permission) => Some(identity.user_id().to_string()),
            ("<hostUserId>", ResolveMode::Normal) => Some(identity.host_user_id().to_string()),
            ("<variablePackageName>", ResolveMode::Normal) => self.variable_package_name(),
            ("<clonePackageName>", ResolveMode::Normal) => Some(self.clone_package_name()),
            ("<arkWebPackageName>", ResolveMode::Normal) => {
                Some(self.params.get_cached(PARAM_ARKWEB_PACKAGE))
            }
            ("<devModel>", ResolveMode::Normal) => Some(self.params.get_cached(PARAM_DEVICE_MODEL)),
            _ => return None,
        };
        Some(value)
    }

    fn package_name_index(&self) -> String {
        let identity = self.identity;
        if identity.bundle_index != 0 {
            format!("{}_{}", identity.bundle_index, identity.bundle_name)
        } else {
            identity.bundle_name.clone()
        }
    }

    /// Directory name that separates atomic, clone and extension instances
    ///
    /// `None` when the form needs an account id or extension type the
    /// identity does not carry.
    pub fn variable_package_name(&self) -> Option<String> {
        let identity = self.identity;
        let bundle = &identity.bundle_name;

        if identity.is_atomic_service() {
            return identity
                .account_id
                .as_deref()
                .filter(|a| !a.is_empty())
                .map(|account| format!("+auid-{}+{}", account, bundle));
        }

        let extension_flag = identity.has_flag(AppFlag::ExtensionSandbox);
        let extension = identity.extension_type.as_deref().filter(|t| !t.is_empty());
        match (identity.is_clone(), extension_flag) {
            (true, true) => extension
                .map(|ext| format!("+clone-{}+extension-{}+{}", identity.bundle_index, ext, bundle)),
            (false, true) => extension.map(|ext| format!("+extension-{}+{}", ext, bundle)),
            (true, false) => Some(format!("+clone-{}+{}", identity.bundle_index, bundle)),
            (false, false) => Some(bundle.clone()),
        }
    }

    /// Clone-form name whenever the clone flag is set
    pub fn clone_package_name(&self) -> String {
        let identity = self.identity;
        if identity.has_flag(AppFlag::CloneEnable) {
            format!("+clone-{}+{}", identity.bundle_index, identity.bundle_name)
        } else {
            identity.bundle_name.clone()
        }
    }

    /// Default sandbox root: `/mnt/sandbox/{user}/[isolated/]{name}`
    pub fn default_sandbox_root(&self) -> String {
        let identity = self.identity;
        let isolated = if identity.is_isolated() { "isolated/" } else { "" };
        format!(
            "{}{}/{}{}",
            SANDBOX_ROOT_DIR,
            identity.user_id(),
            isolated,
            self.clone_package_name()
        )
    }

    /// Sandbox root honouring a policy override unless it names the default layout
    pub fn sandbox_root(&self, override_template: Option<&str>) -> String {
        if !self.identity.is_resolvable() {
            return String::new();
        }
        match override_template {
            Some(template) if !DEFAULT_ROOT_TEMPLATES.contains(&template) => {
                let root = self.resolve(template);
                debug!("sandbox-root overridden to {}", root);
                root
            }
            _ => self.default_sandbox_root(),
        }
    }
}

/// Expand a `param-src-path` template: `<name>` looks the parameter up
///
/// Falls back to the raw template when the parameter is unset.
pub fn parse_param_template(params: &ParamCache, template: &str) -> String {
    if template.is_empty() {
        return String::new();
    }
    let name = if template.len() > 2 && template.starts_with('<') && template.ends_with('>') {
        &template[1..template.len() - 1]
    } else {
        template
    };
    match params.get(name) {
        Some(value) => value,
        None => {
            warn!("Parameter {} is unset", name);
            template.to_string()
        }
    }
}

/// Join path pieces with single separators; any `..` rejects the whole path
pub fn join_param_paths(parts: &[&str]) -> String {
    let mut result = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        if part.contains("..") {
            warn!("Param src path {} rejected", part);
            return String::new();
        }
        let mut piece: &str = part;
        if !result.is_empty() && !result.ends_with('/') && !piece.starts_with('/') {
            result.push('/');
        }
        if result.ends_with('/') {
            piece = piece.strip_prefix('/').unwrap_or(piece);
        }
        result.push_str(piece);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AppFlag;
    use pretty_assertions::assert_eq;

    fn identity() -> AppIdentity {
        AppIdentity::builder("com.example.app")
            .with_uid(20_010_029, 20_010_029)
            .build()
            .unwrap()
    }

    #[test]
    fn test_basic_tokens() {
        let id = identity();
        let params = ParamCache::default();
        let resolver = PathResolver::new(&id, &params);
        assert_eq!(
            resolver.resolve("/data/app/el1/<currentUserId>/base/<PackageName>"),
            "/data/app/el1/100/base/com.example.app"
        );
    }

    #[test]
    fn test_substitution_is_not_rescanned() {
        let id = AppIdentity::builder("<currentUserId>")
            .with_uid(20_010_029, 0)
            .build()
            .unwrap();
        let params = ParamCache::default();
        let resolver = PathResolver::new(&id, &params);
        assert_eq!(resolver.resolve("/a/<PackageName>/b"), "/a/<currentUserId>/b");
    }

    #[test]
    fn test_unknown_tokens_copied() {
        let id = identity();
        let params = ParamCache::default();
        let resolver = PathResolver::new(&id, &params);
        assert_eq!(resolver.resolve("/a/<unknown>/b<"), "/a/<unknown>/b<");
        assert_eq!(resolver.resolve("/a/<<PackageName>"), "/a/<com.example.app");
    }

    #[test]
    fn test_permission_mode() {
        let id = identity();
        let params = ParamCache::default();
        let resolver = PathResolver::new(&id, &params);
        assert_eq!(
            resolver.resolve_permission("/storage/Users/<currentUserId>/appdata/<permissionUserId>"),
            "/storage/Users/currentUser/appdata/100"
        );
        assert_eq!(resolver.resolve("/x/<permissionUserId>"), "/x/<permissionUserId>");
    }

    #[test]
    fn test_variable_package_name_forms() {
        let params = ParamCache::default();

        let clone = AppIdentity::builder("com.example.app")
            .with_flag(AppFlag::CloneEnable)
            .with_bundle_index(1)
            .build()
            .unwrap();
        assert_eq!(
            PathResolver::new(&clone, &params).resolve("<variablePackageName>"),
            "+clone-1+com.example.app"
        );

        let ext = AppIdentity::builder("com.example.app")
            .with_flag(AppFlag::ExtensionSandbox)
            .with_extension_type("backup")
            .build()
            .unwrap();
        assert_eq!(
            PathResolver::new(&ext, &params).variable_package_name().as_deref(),
            Some("+extension-backup+com.example.app")
        );

        let atomic = AppIdentity::builder("com.example.app")
            .with_flag(AppFlag::AtomicService)
            .with_flag(AppFlag::CloneEnable)
            .with_bundle_index(3)
            .with_account_id("acct")
            .build()
            .unwrap();
        assert_eq!(
            PathResolver::new(&atomic, &params).variable_package_name().as_deref(),
            Some("+auid-acct+com.example.app")
        );
    }

    #[test]
    fn test_extension_without_type_resolves_empty() {
        let id = AppIdentity::builder("com.example.app")
            .with_flag(AppFlag::ExtensionSandbox)
            .build()
            .unwrap();
        let params = ParamCache::default();
        assert_eq!(PathResolver::new(&id, &params).resolve("/a/<variablePackageName>"), "");
    }

    #[test]
    fn test_unresolvable_identity() {
        let id = AppIdentity::default();
        let params = ParamCache::default();
        assert_eq!(PathResolver::new(&id, &params).resolve("/a/<PackageName>"), "");
    }

    #[test]
    fn test_parameters_cached_after_first_lookup() {
        let mut mock = MockSystemParameters::new();
        mock.expect_get()
            .withf(|name| name == PARAM_ARKWEB_PACKAGE)
            .times(1)
            .returning(|_| Some("com.arkweb.core".to_string()));
        let params = ParamCache::new(Arc::new(mock));
        let id = identity();
        let resolver = PathResolver::new(&id, &params);

        assert_eq!(resolver.resolve("/data/<arkWebPackageName>"), "/data/com.arkweb.core");
        assert_eq!(resolver.resolve("/lib/<arkWebPackageName>"), "/lib/com.arkweb.core");
    }

    #[test]
    fn test_sandbox_root() {
        let params = ParamCache::default();
        let id = AppIdentity::builder("com.example.app")
            .with_uid(20_010_029, 0)
            .with_flag(AppFlag::CloneEnable)
            .with_flag(AppFlag::IsolatedSandboxType)
            .with_bundle_index(2)
            .build()
            .unwrap();
        let resolver = PathResolver::new(&id, &params);
        assert_eq!(
            resolver.sandbox_root(Some("/mnt/sandbox/<currentUserId>/<PackageName>")),
            "/mnt/sandbox/100/isolated/+clone-2+com.example.app"
        );
        assert_eq!(
            resolver.sandbox_root(Some("/mnt/custom/<PackageName>")),
            "/mnt/custom/com.example.app"
        );
    }

    #[test]
    fn test_param_template_and_join() {
        let params = ParamCache::new(Arc::new(StaticParameters::new().with("const.x.root", "/vendor/x")));
        assert_eq!(parse_param_template(&params, "<const.x.root>"), "/vendor/x");
        assert_eq!(parse_param_template(&params, "<const.missing>"), "<const.missing>");

        assert_eq!(join_param_paths(&["/vendor/x/", "/lib", "fonts"]), "/vendor/x/lib/fonts");
        assert_eq!(join_param_paths(&["/a", "../etc"]), "");
    }
}
