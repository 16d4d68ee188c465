/*!
 * Policy Store
 * Parsed policy documents per kind, loaded once and read lock-free
 */

use super::loader::{PolicyLoader, PolicyLoaderConfig};
use super::types::*;
use arc_swap::ArcSwapOption;
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;

/// Documents of one kind, in load order
pub type DocumentList = Arc<Vec<Arc<PolicyDocument>>>;

/// Holds the normal and isolated policy documents
pub struct PolicyStore {
    loader: Mutex<PolicyLoader>,
    normal: ArcSwapOption<Vec<Arc<PolicyDocument>>>,
    isolated: ArcSwapOption<Vec<Arc<PolicyDocument>>>,
}

impl PolicyStore {
    pub fn new(config: PolicyLoaderConfig) -> Self {
        Self {
            loader: Mutex::new(PolicyLoader::new(config)),
            normal: ArcSwapOption::const_empty(),
            isolated: ArcSwapOption::const_empty(),
        }
    }

    /// Store pre-populated with documents, bypassing the filesystem
    pub fn from_documents(normal: Vec<PolicyDocument>, isolated: Vec<PolicyDocument>) -> Self {
        let store = Self::new(PolicyLoaderConfig::with_dirs(Vec::<std::path::PathBuf>::new()));
        store.publish(PolicyKind::Normal, normal.into_iter().map(Arc::new).collect());
        store.publish(PolicyKind::Isolated, isolated.into_iter().map(Arc::new).collect());
        store
    }

    fn slot(&self, kind: PolicyKind) -> &ArcSwapOption<Vec<Arc<PolicyDocument>>> {
        match kind {
            PolicyKind::Normal => &self.normal,
            PolicyKind::Isolated => &self.isolated,
        }
    }

    fn publish(&self, kind: PolicyKind, documents: Vec<Arc<PolicyDocument>>) {
        self.slot(kind).store(Some(Arc::new(documents)));
    }

    /// Load one kind if not loaded yet; returns the document count
    pub fn load_kind(&self, kind: PolicyKind) -> usize {
        let loader = self.loader.lock();
        if let Some(existing) = self.slot(kind).load_full() {
            return existing.len();
        }
        let documents = loader.load(kind);
        let count = documents.len();
        if count == 0 {
            info!("No {} sandbox policy found, sandbox disabled for that kind", kind);
        }
        self.publish(kind, documents);
        count
    }

    /// Load both kinds; returns the total document count
    pub fn load(&self) -> usize {
        PolicyKind::ALL.iter().map(|kind| self.load_kind(*kind)).sum()
    }

    /// Append a document to an already published kind
    pub fn extend(&self, kind: PolicyKind, document: PolicyDocument) {
        let _loader = self.loader.lock();
        let mut documents: Vec<Arc<PolicyDocument>> = self
            .slot(kind)
            .load_full()
            .map(|list| list.as_ref().clone())
            .unwrap_or_default();
        documents.push(Arc::new(document));
        self.publish(kind, documents);
    }

    /// Documents of one kind; empty when not loaded
    pub fn documents_of(&self, kind: PolicyKind) -> DocumentList {
        self.slot(kind)
            .load_full()
            .unwrap_or_else(|| Arc::new(Vec::new()))
    }

    pub fn is_loaded(&self, kind: PolicyKind) -> bool {
        self.slot(kind).load().is_some()
    }

    /// Whether any policy exists for this kind
    pub fn is_enabled(&self, kind: PolicyKind) -> bool {
        !self.documents_of(kind).is_empty()
    }

    /// Drop the documents of one kind; a later load re-reads the files
    pub fn release(&self, kind: PolicyKind) {
        let _loader = self.loader.lock();
        self.slot(kind).store(None);
        info!("Released {} sandbox policy", kind);
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(PolicyLoaderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_of_unloaded_kind_is_empty() {
        let store = PolicyStore::new(PolicyLoaderConfig::with_dirs(Vec::<std::path::PathBuf>::new()));
        assert!(store.documents_of(PolicyKind::Normal).is_empty());
        assert!(!store.is_loaded(PolicyKind::Normal));
    }

    #[test]
    fn test_load_then_release() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("appdata-sandbox.json"), "{}").unwrap();

        let store = PolicyStore::new(PolicyLoaderConfig::with_dirs([dir.path()]));
        assert_eq!(store.load(), 1);
        assert!(store.is_enabled(PolicyKind::Normal));
        assert!(!store.is_enabled(PolicyKind::Isolated));

        store.release(PolicyKind::Normal);
        assert!(!store.is_loaded(PolicyKind::Normal));
        assert_eq!(store.load_kind(PolicyKind::Normal), 1);
    }

    #[test]
    fn test_extend_appends() {
        let store = PolicyStore::from_documents(vec![PolicyDocument::default()], vec![]);
        store.extend(PolicyKind::Normal, PolicyDocument::default());
        assert_eq!(store.documents_of(PolicyKind::Normal).len(), 2);
    }
}
