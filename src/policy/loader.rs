/*!
 * Policy Loader
 * Layered search of the configuration directories
 */

use super::types::*;
use crate::core::json;
use crate::core::limits::DEFAULT_CONFIG_DIRS;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where to look for policy files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLoaderConfig {
    /// Searched in order; files found later extend earlier ones
    pub search_dirs: Vec<PathBuf>,
    pub normal_file: String,
    pub isolated_file: String,
}

impl Default for PolicyLoaderConfig {
    fn default() -> Self {
        Self {
            search_dirs: DEFAULT_CONFIG_DIRS.iter().map(PathBuf::from).collect(),
            normal_file: PolicyKind::Normal.default_file_name().to_string(),
            isolated_file: PolicyKind::Isolated.default_file_name().to_string(),
        }
    }
}

impl PolicyLoaderConfig {
    /// Search only the given directories
    pub fn with_dirs<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_dirs: dirs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn file_name(&self, kind: PolicyKind) -> &str {
        match kind {
            PolicyKind::Normal => &self.normal_file,
            PolicyKind::Isolated => &self.isolated_file,
        }
    }

    /// Candidate file paths for a document kind, in search order
    pub fn candidates(&self, kind: PolicyKind) -> Vec<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(self.file_name(kind)))
            .collect()
    }
}

/// Parse one policy file
pub fn parse_document(path: &Path, bytes: &[u8]) -> PolicyResult<PolicyDocument> {
    json::from_slice(bytes).map_err(|e| PolicyError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Read and parse one policy file
pub fn read_document(path: &Path) -> PolicyResult<PolicyDocument> {
    let bytes = std::fs::read(path).map_err(|e| PolicyError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_document(path, &bytes)
}

/// Layered policy loader
#[derive(Debug, Clone, Default)]
pub struct PolicyLoader {
    config: PolicyLoaderConfig,
}

impl PolicyLoader {
    pub fn new(config: PolicyLoaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyLoaderConfig {
        &self.config
    }

    /// Load every readable document of `kind`
    ///
    /// Missing files are skipped silently; unreadable or malformed ones are
    /// logged and skipped.
    pub fn load(&self, kind: PolicyKind) -> Vec<Arc<PolicyDocument>> {
        let mut documents = Vec::new();
        for path in self.config.candidates(kind) {
            if !path.is_file() {
                debug!("No {} policy at {}", kind, path.display());
                continue;
            }
            match read_document(&path) {
                Ok(document) => {
                    info!("Loaded {} policy from {}", kind, path.display());
                    documents.push(Arc::new(document));
                }
                Err(e) => warn!("Skipping {} policy: {}", kind, e),
            }
        }
        documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_layered_load_skips_bad_files() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let third = tempfile::tempdir().unwrap();

        fs::write(
            first.path().join("appdata-sandbox.json"),
            r#"{"common": [{"app-base": [{}]}]}"#,
        )
        .unwrap();
        fs::write(second.path().join("appdata-sandbox.json"), "{ broken").unwrap();
        fs::write(
            third.path().join("appdata-sandbox.json"),
            r#"{"permission": [{"ohos.permission.X": [{}]}]}"#,
        )
        .unwrap();

        let loader = PolicyLoader::new(PolicyLoaderConfig::with_dirs([
            first.path(),
            second.path(),
            third.path(),
        ]));
        let docs = loader.load(PolicyKind::Normal);
        assert_eq!(docs.len(), 2);
        assert!(docs[0].app_base().is_some());
        assert_eq!(docs[1].permissions().count(), 1);

        assert!(loader.load(PolicyKind::Isolated).is_empty());
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_document(Path::new("/etc/x.json"), b"[1,").unwrap_err();
        assert!(matches!(err, PolicyError::Parse { ref path, .. } if path == "/etc/x.json"));
    }
}
