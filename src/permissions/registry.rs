/*!
 * Permission Registry
 * Stable integer index per permission name, frozen after load
 */

use crate::core::limits::INVALID_PERMISSION_INDEX;
use crate::policy::{PolicyKind, PolicyStore};
use arc_swap::ArcSwapOption;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Frozen name/index table
#[derive(Debug, Default)]
struct PermissionTable {
    by_name: BTreeMap<String, i32>,
    by_index: Vec<String>,
}

#[derive(Debug, Default)]
struct RegistryBuilder {
    names: BTreeSet<String>,
    loaded: bool,
}

/// Permission name registry
///
/// Names are collected under a mutex, then `renumber` publishes an immutable
/// table that readers access without locking. Indices follow name order.
pub struct PermissionRegistry {
    builder: Mutex<RegistryBuilder>,
    table: ArcSwapOption<PermissionTable>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self {
            builder: Mutex::new(RegistryBuilder::default()),
            table: ArcSwapOption::const_empty(),
        }
    }

    /// Add a name; returns its index in the current name order
    ///
    /// The index is only final once `renumber` has run.
    pub fn register(&self, name: &str) -> i32 {
        let mut builder = self.builder.lock();
        builder.names.insert(name.to_string());
        builder
            .names
            .iter()
            .position(|n| n == name)
            .map(|i| i as i32)
            .unwrap_or(INVALID_PERMISSION_INDEX)
    }

    /// Assign 0..N-1 in name order and publish; returns N
    pub fn renumber(&self) -> usize {
        let builder = self.builder.lock();
        let by_index: Vec<String> = builder.names.iter().cloned().collect();
        let by_name = by_index
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as i32))
            .collect();
        let count = by_index.len();
        self.table.store(Some(Arc::new(PermissionTable { by_name, by_index })));
        debug!("Permission table renumbered: {} entries", count);
        count
    }

    /// Index of a name, if registered and renumbered
    pub fn lookup(&self, name: &str) -> Option<i32> {
        self.table
            .load()
            .as_ref()
            .and_then(|table| table.by_name.get(name).copied())
    }

    /// Index of a name, or `INVALID_PERMISSION_INDEX`
    pub fn lookup_raw(&self, name: &str) -> i32 {
        self.lookup(name).unwrap_or(INVALID_PERMISSION_INDEX)
    }

    pub fn lookup_by_index(&self, index: i32) -> Option<String> {
        if index < 0 {
            return None;
        }
        self.table
            .load()
            .as_ref()
            .and_then(|table| table.by_index.get(index as usize).cloned())
    }

    /// Number of renumbered entries (the permission bitset width)
    pub fn count(&self) -> usize {
        self.table
            .load()
            .as_ref()
            .map(|table| table.by_index.len())
            .unwrap_or(0)
    }

    /// All names in index order
    pub fn names(&self) -> Vec<String> {
        self.table
            .load()
            .as_ref()
            .map(|table| table.by_index.clone())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.builder.lock().loaded
    }

    /// Register every `permission` key of both document kinds, once
    ///
    /// A second call is a no-op until `teardown`. Returns the entry count.
    pub fn load_from(&self, store: &PolicyStore) -> usize {
        {
            let mut builder = self.builder.lock();
            if builder.loaded {
                drop(builder);
                return self.count();
            }
            for kind in PolicyKind::ALL {
                for document in store.documents_of(kind).iter() {
                    for (name, _) in document.permissions() {
                        builder.names.insert(name.to_string());
                    }
                }
            }
            builder.loaded = true;
        }
        let count = self.renumber();
        info!("Permission registry loaded: {} permissions", count);
        count
    }

    /// Clear the table and the loaded marker
    pub fn teardown(&self) {
        let mut builder = self.builder.lock();
        builder.names.clear();
        builder.loaded = false;
        self.table.store(None);
        debug!("Permission registry torn down");
    }
}

impl Default for PermissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyDocument;

    #[test]
    fn test_indices_follow_name_order() {
        let registry = PermissionRegistry::new();
        registry.register("ohos.permission.C");
        registry.register("ohos.permission.A");
        registry.register("ohos.permission.B");
        registry.register("ohos.permission.A");

        assert_eq!(registry.renumber(), 3);
        assert_eq!(registry.lookup("ohos.permission.A"), Some(0));
        assert_eq!(registry.lookup("ohos.permission.B"), Some(1));
        assert_eq!(registry.lookup("ohos.permission.C"), Some(2));
        assert_eq!(registry.lookup_by_index(1).as_deref(), Some("ohos.permission.B"));
    }

    #[test]
    fn test_unknown_lookup_misses() {
        let registry = PermissionRegistry::new();
        registry.register("ohos.permission.A");
        registry.renumber();
        assert_eq!(registry.lookup("ohos.permission.Z"), None);
        assert_eq!(registry.lookup_raw("ohos.permission.Z"), INVALID_PERMISSION_INDEX);
        assert_eq!(registry.lookup_by_index(-1), None);
        assert_eq!(registry.lookup_by_index(5), None);
    }

    #[test]
    fn test_lookup_before_renumber_misses() {
        let registry = PermissionRegistry::new();
        registry.register("ohos.permission.A");
        assert_eq!(registry.lookup("ohos.permission.A"), None);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_load_from_store_and_teardown() {
        let doc: PolicyDocument = serde_json::from_str(
            r#"{"permission": [{"ohos.permission.Y": [{}], "ohos.permission.X": [{}]}]}"#,
        )
        .unwrap();
        let isolated: PolicyDocument =
            serde_json::from_str(r#"{"permission": [{"ohos.permission.W": [{}]}]}"#).unwrap();
        let store = PolicyStore::from_documents(vec![doc], vec![isolated]);

        let registry = PermissionRegistry::new();
        assert_eq!(registry.load_from(&store), 3);
        assert!(registry.is_loaded());
        assert_eq!(registry.lookup("ohos.permission.W"), Some(0));
        assert_eq!(registry.load_from(&store), 3);

        registry.teardown();
        assert!(!registry.is_loaded());
        assert_eq!(registry.lookup("ohos.permission.W"), None);
        assert_eq!(registry.load_from(&store), 3);
    }

    #[test]
    fn test_empty_store_yields_empty_registry() {
        let store = PolicyStore::from_documents(vec![], vec![]);
        let registry = PermissionRegistry::new();
        assert_eq!(registry.load_from(&store), 0);
        assert_eq!(registry.lookup("ohos.permission.FILE_ACCESS_MANAGER"), None);
    }
}
