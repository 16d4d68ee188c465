/*!
 * Permission Set
 * Per-app bitset of granted permission indices
 */

use super::registry::PermissionRegistry;
use serde::{Deserialize, Serialize};

/// Fixed-width bitset over permission indices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    width: usize,
    words: Vec<u64>,
}

impl PermissionSet {
    /// Empty set able to hold `width` indices
    pub fn with_width(width: usize) -> Self {
        Self {
            width,
            words: vec![0; width.div_ceil(64)],
        }
    }

    /// Set the bit of every registered name; unknown names are ignored
    pub fn from_names<S: AsRef<str>>(registry: &PermissionRegistry, names: &[S]) -> Self {
        let mut set = Self::with_width(registry.count());
        for name in names {
            if let Some(index) = registry.lookup(name.as_ref()) {
                set.set(index);
            }
        }
        set
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns false when the index is out of range
    pub fn set(&mut self, index: i32) -> bool {
        if index < 0 || index as usize >= self.width {
            return false;
        }
        let index = index as usize;
        self.words[index / 64] |= 1u64 << (index % 64);
        true
    }

    pub fn is_set(&self, index: i32) -> bool {
        if index < 0 || index as usize >= self.width {
            return false;
        }
        let index = index as usize;
        self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Whether the named permission is granted
    pub fn has(&self, registry: &PermissionRegistry, name: &str) -> bool {
        registry.lookup(name).is_some_and(|index| self.is_set(index))
    }

    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count_set() == 0
    }
}

/// A permission set paired with the registry that indexes it
#[derive(Clone, Copy)]
pub struct Grants<'a> {
    registry: &'a PermissionRegistry,
    set: &'a PermissionSet,
}

impl<'a> Grants<'a> {
    pub fn new(registry: &'a PermissionRegistry, set: &'a PermissionSet) -> Self {
        Self { registry, set }
    }

    #[inline]
    pub fn has(&self, name: &str) -> bool {
        self.set.has(self.registry, name)
    }

    pub fn registry(&self) -> &'a PermissionRegistry {
        self.registry
    }

    pub fn set(&self) -> &'a PermissionSet {
        self.set
    }
}
