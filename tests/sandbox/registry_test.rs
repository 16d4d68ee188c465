/*!
 * Permission Registry Tests
 * Index range, sentinel and bitset behaviour
 */

use appspawn_sandbox::core::limits::INVALID_PERMISSION_INDEX;
use appspawn_sandbox::permissions::{Grants, PermissionRegistry, PermissionSet};
use proptest::collection::btree_set;
use proptest::prelude::*;

#[test]
fn test_unknown_name_sentinel() {
    let registry = PermissionRegistry::new();
    registry.register("ohos.permission.A");
    registry.renumber();
    assert_eq!(registry.lookup_raw("ohos.permission.UNKNOWN"), INVALID_PERMISSION_INDEX);
    assert_eq!(registry.lookup("ohos.permission.UNKNOWN"), None);
    assert_eq!(registry.lookup_by_index(-1), None);
}

#[test]
fn test_grants_ignore_unregistered() {
    let registry = PermissionRegistry::new();
    registry.register("ohos.permission.A");
    registry.register("ohos.permission.B");
    registry.renumber();
    let set = PermissionSet::from_names(&registry, &["ohos.permission.B", "ohos.permission.Z"]);
    let grants = Grants::new(&registry, &set);
    assert!(grants.has("ohos.permission.B"));
    assert!(!grants.has("ohos.permission.A"));
    assert!(!grants.has("ohos.permission.Z"));
    assert_eq!(set.count_set(), 1);
}

proptest! {
    #[test]
    fn prop_indices_cover_range(names in btree_set("[A-Z_]{1,12}", 1..40)) {
        let registry = PermissionRegistry::new();
        for name in &names {
            registry.register(&format!("ohos.permission.{}", name));
        }
        let count = registry.renumber();
        prop_assert_eq!(count, names.len());

        let mut seen = vec![false; count];
        for name in &names {
            let index = registry.lookup_raw(&format!("ohos.permission.{}", name));
            prop_assert!(index >= 0 && (index as usize) < count);
            seen[index as usize] = true;
        }
        prop_assert!(seen.into_iter().all(|s| s));
    }
}
